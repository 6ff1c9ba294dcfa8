//! Node lifecycle management: shutdown flag, termination callbacks, and
//! signal handling shared by the three server binaries.

use std::sync::{Arc, Mutex};

/// Called once when the node begins shutting down.
pub type TermFunc = Box<dyn Fn() + Send + 'static>;

pub struct ServerState {
    shutdown_requested: bool,
    term_func: Option<TermFunc>,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState {
            shutdown_requested: false,
            term_func: None,
        }
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_requested
    }

    pub fn set_term_func<F>(&mut self, func: F)
    where
        F: Fn() + Send + 'static,
    {
        self.term_func = Some(Box::new(func));
    }

    pub fn call_term_func(&self) {
        if let Some(ref func) = self.term_func {
            func();
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared across the signal task and the main accept loops.
pub type SharedServerState = Arc<Mutex<ServerState>>;

pub fn create_server_state() -> SharedServerState {
    Arc::new(Mutex::new(ServerState::new()))
}

/// Signals a node reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM (graceful shutdown)
    Terminate,
    /// SIGPIPE (broken pipe - ignored)
    Pipe,
}

impl Signal {
    pub fn from_signal_num(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGTERM => Some(Signal::Terminate),
            libc::SIGPIPE => Some(Signal::Pipe),
            _ => None,
        }
    }

    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

/// Block until a shutdown-worthy signal arrives, then flip the shared flag
/// and run the termination callback. Each binary awaits this at top level.
#[cfg(unix)]
pub async fn wait_for_shutdown(state: SharedServerState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    let signum = tokio::select! {
        _ = sigint.recv() => libc::SIGINT,
        _ = sigterm.recv() => libc::SIGTERM,
    };

    if let Some(sig) = Signal::from_signal_num(signum) {
        if sig.should_shutdown() {
            tracing::info!("[core] [shutdown] signal={:?}", sig);
            let mut s = state.lock().expect("server state poisoned");
            s.request_shutdown();
            s.call_term_func();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_state_shutdown() {
        let mut state = ServerState::new();
        assert!(!state.should_shutdown());
        state.request_shutdown();
        assert!(state.should_shutdown());
    }

    #[test]
    fn test_term_func() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let mut state = ServerState::new();
        state.set_term_func(move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert!(!called.load(Ordering::SeqCst));
        state.call_term_func();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_signal_conversion() {
        assert_eq!(Signal::from_signal_num(libc::SIGINT), Some(Signal::Interrupt));
        assert_eq!(Signal::from_signal_num(libc::SIGTERM), Some(Signal::Terminate));
        assert_eq!(Signal::from_signal_num(libc::SIGPIPE), Some(Signal::Pipe));
        assert_eq!(Signal::from_signal_num(999), None);
    }

    #[test]
    fn test_signal_should_shutdown() {
        assert!(Signal::Interrupt.should_shutdown());
        assert!(Signal::Terminate.should_shutdown());
        assert!(!Signal::Pipe.should_shutdown());
    }

    #[test]
    fn test_shared_server_state() {
        let state = create_server_state();
        state.lock().unwrap().request_shutdown();
        assert!(state.lock().unwrap().should_shutdown());
    }
}
