#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use crate::{
        registry::ClientRegistry,
        tests::connection,
        types::{ClientInfo, MessengerError},
        ConnectionHandle,
    };

    #[test]
    fn test_register_and_find() {
        let registry = ClientRegistry::new();
        let (handle, _queue) = connection("alice");

        registry.register(handle.clone()).unwrap();

        let found = registry.find_client("alice").unwrap();
        assert!(found.same_connection(&handle));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("alice"));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = ClientRegistry::new();
        let (first, _q1) = connection("alice");
        let (second, _q2) = connection("alice");

        registry.register(first.clone()).unwrap();
        let err = registry.register(second).unwrap_err();

        assert!(matches!(err, MessengerError::DuplicateClient(id) if id == "alice"));
        assert!(registry.find_client("alice").unwrap().same_connection(&first));
    }

    #[test]
    fn test_find_missing_client() {
        let registry = ClientRegistry::new();
        assert!(registry.find_client("nobody").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_client_info() {
        let registry = ClientRegistry::new();
        let info = ClientInfo::new("alice").with_attribute("region", "eu");
        let (handle, _queue) = ConnectionHandle::new(info, 4);

        assert!(registry.resolve_client_info(&handle).is_none());

        registry.register(handle.clone()).unwrap();
        let resolved = registry.resolve_client_info(&handle).unwrap();
        assert_eq!(resolved.client_id(), "alice");
        assert_eq!(resolved.attribute("region"), Some("eu"));
    }

    #[test]
    fn test_resolve_stale_handle_is_none() {
        let registry = ClientRegistry::new();
        let (old, _q1) = connection("alice");
        let (new, _q2) = connection("alice");

        registry.register(old.clone()).unwrap();
        registry.remove("alice");
        registry.register(new.clone()).unwrap();

        assert!(registry.resolve_client_info(&old).is_none());
        assert!(registry.resolve_client_info(&new).is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ClientRegistry::new();
        let (handle, _queue) = connection("alice");
        registry.register(handle).unwrap();

        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.remove("never-there").is_none());
        assert!(registry.find_client("alice").is_none());
    }

    #[test]
    fn test_remove_handle_keeps_newer_connection() {
        let registry = ClientRegistry::new();
        let (old, _q1) = connection("alice");
        let (new, _q2) = connection("alice");

        registry.register(old.clone()).unwrap();
        assert!(registry.remove_handle(&old).is_some());
        registry.register(new.clone()).unwrap();

        // Late disconnect of the first connection.
        assert!(registry.remove_handle(&old).is_none());
        assert!(registry.find_client("alice").unwrap().same_connection(&new));
    }

    #[test]
    fn test_clear_returns_all_handles() {
        let registry = ClientRegistry::new();
        let mut queues = Vec::new();
        for id in ["a", "b", "c"] {
            let (handle, queue) = connection(id);
            registry.register(handle).unwrap();
            queues.push(queue);
        }

        let mut ids: Vec<String> = registry.client_ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert_eq!(registry.clear().len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_and_remove() {
        let registry = Arc::new(ClientRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for n in 0..100 {
                        let id = format!("client-{worker}-{n}");
                        let (handle, _queue) = connection(&id);
                        registry.register(handle.clone()).unwrap();
                        assert!(registry.find_client(&id).is_some());
                        if n % 2 == 0 {
                            assert!(registry.remove_handle(&handle).is_some());
                            assert!(registry.find_client(&id).is_none());
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 50);
    }
}
