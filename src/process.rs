//! Process and port liveness checks shared by the registry and the
//! file-safety engine.

use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

/// Default timeout for the registry's lazy port probe.
pub const DEFAULT_PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout used for the pre-flight probe before sending to an agent.
pub const PREFLIGHT_PORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Liveness capability. Injected so tests can declare PIDs dead without
/// spawning and reaping real processes.
pub trait Liveness: Send + Sync {
    fn is_process_alive(&self, pid: u32) -> bool;

    fn is_port_open(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

pub type SharedLiveness = Arc<dyn Liveness>;

/// Liveness backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

impl SystemLiveness {
    pub fn shared() -> SharedLiveness {
        Arc::new(Self)
    }
}

impl Liveness for SystemLiveness {
    fn is_process_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }

    fn is_port_open(&self, host: &str, port: u16, timeout: Duration) -> bool {
        is_port_open(host, port, timeout)
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    // PID 0 addresses the whole process group, never a single agent.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // EPERM means the process exists but belongs to another user
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_pid_alive(pid: u32) -> bool {
    // No cheap probe here; treat any recorded PID as alive.
    pid != 0
}

/// Returns true when a TCP connection to `host:port` succeeds within `timeout`.
pub fn is_port_open(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(error) => {
            tracing::debug!(target = "synapse::process", host = %host, port, error = %error, "address resolution failed");
            return false;
        }
    };
    addrs
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
}


#[cfg(test)]
mod tests {
    use std::{net::TcpListener, time::Duration};

    use super::{is_pid_alive, is_port_open};

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("failed to spawn 'true'");
        let pid = child.id();
        child.wait().expect("failed to wait on child");
        assert!(!is_pid_alive(pid), "exited child PID should be dead");
    }

    #[test]
    fn bogus_and_zero_pids_are_dead() {
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(4_000_000));
    }

    #[test]
    fn port_probe_sees_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        assert!(is_port_open("127.0.0.1", port, Duration::from_millis(500)));

        drop(listener);
        assert!(!is_port_open("127.0.0.1", port, Duration::from_millis(200)));
    }
}
