//! Shared application state and the WebSocket connection registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_core::EngineConfig;
use vigil_engine::{SessionVerifier, TrustEngine};
use vigil_model::Predictor;
use vigil_store::Store;

/// Outbound WebSocket registry, keyed by session token. Senders are
/// non-blocking; a dead receiver is dropped on the next send.
#[derive(Default)]
pub struct ConnectionManager {
    senders: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl ConnectionManager {
    pub fn register(&self, token: &str, sender: mpsc::UnboundedSender<String>) {
        self.senders.write().insert(token.to_string(), sender);
        debug!(token, "WebSocket registered");
    }

    pub fn unregister(&self, token: &str) {
        self.senders.write().remove(token);
        debug!(token, "WebSocket unregistered");
    }

    /// Push a JSON message to one session's socket, if connected.
    pub fn send_to(&self, token: &str, message: &serde_json::Value) {
        let dead = {
            let senders = self.senders.read();
            match senders.get(token) {
                Some(sender) => sender.send(message.to_string()).is_err(),
                None => false,
            }
        };
        if dead {
            self.unregister(token);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.senders.read().len()
    }
}

/// Everything the handlers need, shared behind one `Arc`.
///
/// Constructed once at startup (`init`) and torn down on shutdown; no
/// hidden module-level state anywhere in the server.
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<EngineConfig>,
    pub predictor: Arc<Predictor>,
    pub engine: Arc<TrustEngine>,
    pub verifier: SessionVerifier,
    pub connections: ConnectionManager,
}

impl AppState {
    /// Wire the full service graph from configuration.
    pub fn init(config: EngineConfig, store: Store) -> Arc<Self> {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let predictor = Arc::new(Predictor::new(
            config.model_dir.clone(),
            config.model_weights.clone(),
        ));
        let engine = Arc::new(TrustEngine::new(
            Arc::clone(&config),
            Arc::clone(&predictor),
        ));
        let verifier = SessionVerifier::new(Arc::clone(&config), Arc::clone(&engine));

        Arc::new(Self {
            store,
            config,
            predictor,
            engine,
            verifier,
            connections: ConnectionManager::default(),
        })
    }
}
