//! Remote-control server.
//!
//! Line-oriented JSON over TCP: one request object per line, one response
//! object per line. Unrecognised commands return an error object with
//! `isError: true` and a human-readable message.

mod manager;

pub use manager::{ManagerError, SessionFactory, StatusReport, StressTestManager};

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::generator::field_catalog;
use crate::workload::{self, ParameterKind};

/// Control server bound to a local address.
pub struct ControlServer {
    listener: TcpListener,
    manager: Arc<StressTestManager>,
}

impl ControlServer {
    /// Binds the listener. Port 0 picks an ephemeral port.
    pub fn bind(port: u16, manager: Arc<StressTestManager>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        info!("control server listening on {}", listener.local_addr()?);
        Ok(Self { listener, manager })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; one thread per connection. Blocks forever.
    pub fn serve(&self) {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let manager = Arc::clone(&self.manager);
                    thread::spawn(move || handle_connection(stream, manager));
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
    }
}

fn handle_connection(stream: TcpStream, manager: Arc<StressTestManager>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!("control connection from {}", peer);

    let reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            warn!("failed to clone control stream: {}", e);
            return;
        }
    });
    let mut writer = stream;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => dispatch(&request, &manager),
            Err(e) => error_response(&format!("invalid JSON request: {}", e)),
        };

        let mut payload = response.to_string();
        payload.push('\n');
        if writer.write_all(payload.as_bytes()).is_err() {
            break;
        }
    }

    debug!("control connection from {} closed", peer);
}

fn error_response(message: &str) -> Value {
    json!({ "isError": true, "error": message })
}

fn parameter_kind_label(kind: &ParameterKind) -> Value {
    match kind {
        ParameterKind::I64 => json!("integer"),
        ParameterKind::F64 => json!("float"),
        ParameterKind::Bool => json!("boolean"),
        ParameterKind::Str => json!("string"),
        ParameterKind::Enum(variants) => json!({ "enum": variants }),
    }
}

fn dispatch(request: &Value, manager: &StressTestManager) -> Value {
    let Some(command) = request.get("command").and_then(Value::as_str) else {
        return error_response("missing 'command' field");
    };

    match command {
        "list_workloads" => {
            let workloads: Vec<Value> = workload::list()
                .iter()
                .map(|entry| json!({ "name": entry.name }))
                .collect();
            let count = workloads.len();
            json!({ "workloads": workloads, "count": count })
        }

        "info" => {
            let Some(name) = request.get("workload").and_then(Value::as_str) else {
                return error_response("info requires a 'workload' field");
            };
            let Some(entry) = workload::find(name) else {
                return error_response(&format!("unknown workload '{}'", name));
            };
            let instance = entry.instantiate();
            let parameters: Vec<Value> = instance
                .parameters()
                .iter()
                .map(|descriptor| {
                    json!({
                        "name": descriptor.name,
                        "description": descriptor.description,
                        "kind": parameter_kind_label(&descriptor.kind),
                    })
                })
                .collect();
            json!({
                "name": entry.name,
                "class": entry.type_name,
                "schema": instance.schema(),
                "default_read_rate": instance.default_read_rate(),
                "parameters": parameters,
            })
        }

        "fields" => {
            let fields: Vec<Value> = field_catalog()
                .iter()
                .map(|descriptor| {
                    json!({
                        "name": descriptor.name,
                        "description": descriptor.description,
                    })
                })
                .collect();
            let count = fields.len();
            json!({ "fields": fields, "count": count })
        }

        "run" => {
            // The configuration comes either nested under "config" or as
            // the request object itself.
            let config_value = request.get("config").cloned().unwrap_or_else(|| {
                let mut value = request.clone();
                if let Some(object) = value.as_object_mut() {
                    object.remove("command");
                }
                value
            });
            let config: RunConfig = match serde_json::from_value(config_value) {
                Ok(config) => config,
                Err(e) => return error_response(&format!("invalid run config: {}", e)),
            };
            match manager.start_run(config) {
                Ok(job_id) => json!({ "job_id": job_id }),
                Err(e) => error_response(&e.to_string()),
            }
        }

        "status" => match manager.status() {
            StatusReport::Running {
                job_id,
                config,
                metrics,
            } => json!({
                "status": "running",
                "job_id": job_id,
                "config": config,
                "metrics": metrics,
            }),
            StatusReport::Idle {
                status,
                last_run_time,
            } => json!({
                "status": status,
                "last_run_time": last_run_time.map(|t| t.to_rfc3339()),
            }),
        },

        "stop" => match manager.stop() {
            Ok(()) => json!({ "stopped": true }),
            Err(e) => error_response(&e.to_string()),
        },

        other => error_response(&format!("unknown tool '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PopulateOption;
    use crate::driver::Session;
    use crate::driver::mock::{LatencyModel, MockConfig, MockSession};
    use crate::engine::EngineOptions;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    fn start_server() -> (std::net::SocketAddr, Arc<StressTestManager>) {
        let factory: SessionFactory = Arc::new(|_config| {
            Ok(Arc::new(MockSession::connect(MockConfig {
                latency: LatencyModel {
                    base: Duration::from_micros(50),
                    jitter: Duration::ZERO,
                },
                failure_rate: 0.0,
                io_threads: 2,
            })) as Arc<dyn Session>)
        });
        let manager = Arc::new(StressTestManager::new(factory, EngineOptions::default()));
        let server = ControlServer::bind(0, Arc::clone(&manager)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.serve());
        (addr, manager)
    }

    fn roundtrip(stream: &mut TcpStream, request: Value) -> Value {
        let mut payload = request.to_string();
        payload.push('\n');
        stream.write_all(payload.as_bytes()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_list_workloads_and_fields() {
        let (addr, _manager) = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        let response = roundtrip(&mut stream, json!({ "command": "list_workloads" }));
        assert_eq!(response["count"], 3);

        let response = roundtrip(&mut stream, json!({ "command": "fields" }));
        assert!(response["count"].as_u64().unwrap() >= 5);
    }

    #[test]
    fn test_info_describes_workload() {
        let (addr, _manager) = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        let response = roundtrip(
            &mut stream,
            json!({ "command": "info", "workload": "BasicTimeSeries" }),
        );
        assert_eq!(response["name"], "BasicTimeSeries");
        assert!(response["schema"][0].as_str().unwrap().contains("CREATE TABLE"));
        assert_eq!(response["parameters"][0]["name"], "limit");

        let response = roundtrip(
            &mut stream,
            json!({ "command": "info", "workload": "Nope" }),
        );
        assert_eq!(response["isError"], true);
    }

    #[test]
    fn test_run_status_stop_lifecycle() {
        let (addr, manager) = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        let config = RunConfig {
            workload: "KeyValue".to_string(),
            iterations: Some(100_000_000),
            threads: 2,
            rate: 200,
            partition_count: 100,
            read_rate: Some(0.5),
            populate: PopulateOption::None,
            queue_depth: 16,
            ..RunConfig::default()
        };
        let response = roundtrip(
            &mut stream,
            json!({ "command": "run", "config": serde_json::to_value(&config).unwrap() }),
        );
        let job_id = response["job_id"].as_str().unwrap();
        assert!(job_id.len() >= 3);

        // Second run must be rejected while the first is live.
        let response = roundtrip(
            &mut stream,
            json!({ "command": "run", "config": serde_json::to_value(&config).unwrap() }),
        );
        assert_eq!(response["isError"], true);

        let response = roundtrip(&mut stream, json!({ "command": "status" }));
        assert_eq!(response["status"], "running");
        assert_eq!(response["config"]["workload"], "KeyValue");
        assert!(response["metrics"]["selects"]["count"].is_u64());

        let response = roundtrip(&mut stream, json!({ "command": "stop" }));
        assert_eq!(response["stopped"], true);

        manager.wait_idle();
        let response = roundtrip(&mut stream, json!({ "command": "status" }));
        assert_eq!(response["status"], "stopped");
        assert!(response["last_run_time"].is_string());

        // Stop again: nothing to stop.
        let response = roundtrip(&mut stream, json!({ "command": "stop" }));
        assert_eq!(response["isError"], true);
    }

    #[test]
    fn test_config_echo_round_trips() {
        let (addr, manager) = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        let mut config = RunConfig {
            workload: "KeyValue".to_string(),
            iterations: Some(100_000_000),
            threads: 2,
            rate: 100,
            populate: PopulateOption::None,
            queue_depth: 8,
            ..RunConfig::default()
        };
        config
            .fields
            .insert("key_value.value".to_string(), "book(2,4)".to_string());

        roundtrip(
            &mut stream,
            json!({ "command": "run", "config": serde_json::to_value(&config).unwrap() }),
        );
        let response = roundtrip(&mut stream, json!({ "command": "status" }));
        let echoed: RunConfig = serde_json::from_value(response["config"].clone()).unwrap();
        assert_eq!(echoed, config);

        roundtrip(&mut stream, json!({ "command": "stop" }));
        manager.wait_idle();
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let (addr, _manager) = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();
        let response = roundtrip(&mut stream, json!({ "command": "reboot" }));
        assert_eq!(response["isError"], true);
        assert!(response["error"].as_str().unwrap().contains("reboot"));

        let response = roundtrip(&mut stream, json!({ "no_command": 1 }));
        assert_eq!(response["isError"], true);
    }
}
