mod client_test;
mod config_test;
mod registry_test;

use std::sync::{Arc, Mutex};

use crate::{
    handle::{ConnectionHandle, OutboundQueue},
    listener::LifecycleListener,
    server::MessengerServer,
    types::{ClientInfo, ListenerError},
};

pub(crate) fn connection(client_id: &str) -> (ConnectionHandle, OutboundQueue) {
    ConnectionHandle::new(ClientInfo::new(client_id), 16)
}

/// Records every lifecycle event as `"<tag>:<event>:<client>"`.
pub(crate) struct RecordingLifecycle {
    pub(crate) tag: &'static str,
    pub(crate) events: Arc<Mutex<Vec<String>>>,
}

impl LifecycleListener for RecordingLifecycle {
    fn on_client_connect(
        &self,
        client: &ClientInfo,
        _server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:connect:{}", self.tag, client.client_id()));
        Ok(())
    }

    fn on_client_disconnect(
        &self,
        client: &ClientInfo,
        _server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:disconnect:{}", self.tag, client.client_id()));
        Ok(())
    }

    fn on_server_start(&self, _server: &MessengerServer) -> Result<(), ListenerError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:start", self.tag));
        Ok(())
    }
}
