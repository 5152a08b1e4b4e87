pub mod command;
pub mod executor;
pub mod parser;

use crate::config::HostConfig;
use crate::status::Status;
use command::build_command;
use executor::RemoteExecutor;
use parser::parse_response;
use tracing::{debug, warn};

/// Probes one host: build the composite command, run it, parse the output.
///
/// Always returns a [`Status`]; every failure ends up in `Status::error`.
pub async fn probe_host<E>(executor: &E, host: &HostConfig) -> Status
where
    E: RemoteExecutor + ?Sized,
{
    let command = build_command(&host.units);
    debug!(address = %host.address, units = host.units.len(), "probing host");

    let execution = executor.execute(&host.address, &command).await;
    let status = parse_response(&execution.stdout, &host.units, execution.error.as_ref());

    match (&execution.error, status.running) {
        (Some(err), true) => {
            warn!(address = %host.address, error = %err, "remote shell reported an error after a usable response");
        }
        (_, false) => {
            warn!(address = %host.address, error = %status.error, "probe failed");
        }
        (None, true) => {}
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::command::SENTINEL;
    use crate::probe::executor::{ExecError, Execution, SshExecutor};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeExecutor {
        respond: fn() -> Execution,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeExecutor {
        fn new(respond: fn() -> Execution) -> Self {
            Self {
                respond,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn execute(&self, address: &str, command: &str) -> Execution {
            self.calls
                .lock()
                .unwrap()
                .push((address.to_string(), command.to_string()));
            (self.respond)()
        }
    }

    fn host(units: &[&str]) -> HostConfig {
        HostConfig {
            address: "root@10.0.0.5".to_string(),
            units: units.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn refused() -> ExecError {
        ExecError::Exit {
            status: "exit status: 255".to_string(),
            detail: ": ssh: connect to host 10.0.0.5 port 22: Connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn sends_built_command_to_host_address() {
        let executor = FakeExecutor::new(|| Execution::ok(Vec::new()));
        probe_host(&executor, &host(&["nginx", "sshd"])).await;

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "root@10.0.0.5");
        assert_eq!(calls[0].1, build_command(&["nginx", "sshd"]));
        assert_eq!(calls[0].1.matches(SENTINEL).count(), 5);
    }

    #[tokio::test]
    async fn successful_probe_maps_units() {
        let executor = FakeExecutor::new(|| {
            Execution::ok(
                "up\n---@@@---\nfs\n---@@@---\nmem\n---@@@---\nactive\n---@@@---\nactive\n---@@@---\n",
            )
        });
        let status = probe_host(&executor, &host(&["nginx", "sshd"])).await;
        assert!(status.running);
        let names: Vec<&str> = status.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["nginx", "sshd"]);
    }

    #[tokio::test]
    async fn every_transport_and_output_combination_yields_a_status() {
        let cases: [fn() -> Execution; 6] = [
            || Execution::ok(Vec::new()),
            || Execution::ok("garbage"),
            || Execution::ok("up\n---@@@---\nfs\n---@@@---\nmem\n---@@@---\n"),
            || Execution::failed(Vec::new(), refused()),
            || Execution::failed("up\n---@@@---\n", refused()),
            || Execution::failed("up\n---@@@---\nfs\n---@@@---\nmem\n---@@@---\nx\n", refused()),
        ];

        for respond in cases {
            let executor = FakeExecutor::new(respond);
            let status = probe_host(&executor, &host(&["nginx"])).await;
            if status.running {
                assert!(status.error.is_empty());
                assert!(status.units.len() <= 1);
            } else {
                assert!(!status.error.is_empty());
                assert!(status.uptime.is_empty() && status.units.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn transport_failure_message_becomes_status_error() {
        let executor = FakeExecutor::new(|| Execution::failed(Vec::new(), refused()));
        let status = probe_host(&executor, &host(&["nginx"])).await;
        assert!(!status.running);
        assert_eq!(
            status.error,
            "remote shell failed (exit status: 255): ssh: connect to host 10.0.0.5 port 22: Connection refused"
        );
    }

    #[tokio::test]
    async fn session_killed_after_system_sections_still_succeeds() {
        let executor = SshExecutor::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"printf 'up\n---@@@---\nfs\n---@@@---\nmem\n---@@@---\n'; sleep 5"#.to_string(),
                "sh".to_string(),
            ],
            Some(Duration::from_millis(300)),
        );
        let status = probe_host(&executor, &host(&["nginx"])).await;
        assert!(status.running, "{}", status.error);
        assert!(status.error.is_empty());
        assert_eq!(status.uptime, "up\n");
        assert_eq!(status.file_system, "fs\n");
        assert_eq!(status.memory, "mem\n");
        assert!(status.units.is_empty());
    }

    #[tokio::test]
    async fn session_killed_before_system_sections_reports_timeout() {
        let executor = SshExecutor::new(
            "sh",
            vec!["-c".to_string(), "printf 'up\\n'; sleep 5".to_string(), "sh".to_string()],
            Some(Duration::from_millis(300)),
        );
        let status = probe_host(&executor, &host(&["nginx"])).await;
        assert!(!status.running);
        assert_eq!(status.error, "remote shell timed out after 300ms");
    }
}
