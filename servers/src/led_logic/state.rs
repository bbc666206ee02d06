use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::led_logic::arbiter::ArbiterHandle;

/// What a connection told us about itself in its identification frame.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub link: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub arbiter: ArbiterHandle,
    clients: Arc<Mutex<HashMap<usize, ClientInfo>>>,
}

impl AppState {
    pub fn new(arbiter: ArbiterHandle) -> Self {
        Self {
            arbiter,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn add_client(&self, client_id: usize) {
        self.clients
            .lock()
            .expect("clients lock poisoned")
            .insert(client_id, ClientInfo::default());
    }

    pub fn remove_client(&self, client_id: usize) {
        self.clients
            .lock()
            .expect("clients lock poisoned")
            .remove(&client_id);
    }

    pub fn set_identity(&self, client_id: usize, name: Option<String>, link: Option<String>) {
        let mut clients = self.clients.lock().expect("clients lock poisoned");
        if let Some(info) = clients.get_mut(&client_id) {
            if name.is_some() {
                info.name = name;
            }
            if link.is_some() {
                info.link = link;
            }
        }
    }

    /// Connected clients ordered by id.
    pub fn clients(&self) -> Vec<(usize, ClientInfo)> {
        let clients = self.clients.lock().expect("clients lock poisoned");
        let mut list: Vec<_> = clients
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }
}
