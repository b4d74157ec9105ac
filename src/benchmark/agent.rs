//! Event-loop agent
//!
//! One agent per OS thread, each multiplexing its own connections on a
//! private poll instance. Connections never cross threads; results merge
//! by return value after join. The poll timeout honors the earliest
//! pending connection timer so the pacing state machines fire on time.

use std::thread;
use std::time::Duration;

use mio::{Events, Poll, Token};
use tracing::{debug, info};

use crate::client::{Connection, ReadState};
use crate::config::{ConnectionConfig, RunConfig};
use crate::metrics::ConnectionStats;
use crate::utils::error::{BenchError, Result};
use crate::utils::time;

/// Upper bound on how long a poll sleeps with no timer pending.
const IDLE_TICK: Duration = Duration::from_millis(1);

pub struct AgentResult {
    pub stats: ConnectionStats,
    /// Wall seconds spent in the measured phase.
    pub measured_secs: f64,
}

pub struct Agent {
    id: usize,
    cfg: ConnectionConfig,
    poll: Poll,
    events: Events,
    conns: Vec<Connection>,
}

impl Agent {
    /// Connect this agent's share of connections and register them.
    pub fn new(id: usize, run: &RunConfig, cfg: &ConnectionConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let mut conns = Vec::with_capacity(run.connections_per_thread);

        for slot in 0..run.connections_per_thread {
            let mut conn_cfg = cfg.clone();
            conn_cfg.seed = if cfg.seed == 0 {
                fastrand::u64(..)
            } else {
                cfg.seed
                    .wrapping_add((id * run.connections_per_thread + slot) as u64)
            };

            let mut conn = Connection::connect(&run.server, run.port, conn_cfg)?;
            conn.register(poll.registry(), Token(slot))?;
            conns.push(conn);
        }

        debug!(agent = id, connections = conns.len(), "agent connected");
        Ok(Self {
            id,
            cfg: cfg.clone(),
            poll,
            events: Events::with_capacity(1024),
            conns,
        })
    }

    /// One poll pass: dispatch readiness edges, fire expired timers,
    /// push buffered output.
    fn poll_once(&mut self) -> Result<()> {
        let now = time::now();
        let mut timeout = IDLE_TICK;
        for conn in &self.conns {
            if let Some(at) = conn.timer_deadline() {
                let delay = Duration::from_secs_f64((at - now).max(0.0));
                timeout = timeout.min(delay);
            }
        }

        if self.poll.poll(&mut self.events, Some(timeout)).is_err() {
            return Ok(()); // interrupted; retry on the next pass
        }

        for event in self.events.iter() {
            let conn = &mut self.conns[event.token().0];
            if event.is_readable() {
                conn.on_readable()?;
            }
            if event.is_writable() {
                conn.on_writable()?;
            }
        }

        let now = time::now();
        for conn in &mut self.conns {
            conn.fire_timer(now)?;
            conn.flush()?;
        }
        Ok(())
    }

    /// Run the full lifecycle: load, then measure, then merge stats.
    pub fn run(mut self) -> Result<AgentResult> {
        // SASL must finish before any phase traffic goes on the wire,
        // or its reply would be read as a loading acknowledgment.
        if self.cfg.sasl {
            for conn in &mut self.conns {
                conn.flush()?;
            }
            while !self.conns.iter().all(|c| c.read_state() == ReadState::Idle) {
                self.poll_once()?;
            }
        }

        if !self.cfg.noload {
            let now = time::now();
            for conn in &mut self.conns {
                conn.start_loading(now)?;
                conn.flush()?;
            }
            while !self.conns.iter().all(|c| c.loading_done()) {
                self.poll_once()?;
            }
            info!(agent = self.id, records = self.cfg.records, "loading complete");
            for conn in &mut self.conns {
                conn.reset();
            }
        }

        if self.cfg.loadonly {
            return Ok(AgentResult {
                stats: self.merge_stats(),
                measured_secs: 0.0,
            });
        }

        // Mixed workloads against an unloaded server start from a fully
        // absent key universe.
        if self.cfg.mix.is_active() && self.cfg.noload {
            for conn in &mut self.conns {
                conn.note_absent_keys();
            }
        }

        let start = time::now();
        for conn in &mut self.conns {
            conn.begin_measurement(start)?;
            conn.flush()?;
        }
        loop {
            let now = time::now();
            if self.conns.iter().all(|c| c.check_exit_condition(now)) {
                break;
            }
            self.poll_once()?;
        }
        let measured_secs = time::now() - start;

        debug!(agent = self.id, "measured phase finished");
        Ok(AgentResult {
            stats: self.merge_stats(),
            measured_secs,
        })
    }

    fn merge_stats(&mut self) -> ConnectionStats {
        let mut merged = ConnectionStats::new();
        for conn in &mut self.conns {
            merged.merge(&conn.take_stats());
        }
        merged
    }
}

/// Spawn one agent per configured thread and fold their results.
pub fn run_agents(run: &RunConfig, cfg: &ConnectionConfig) -> Result<AgentResult> {
    let mut handles = Vec::with_capacity(run.threads);
    for id in 0..run.threads {
        let run = run.clone();
        let cfg = cfg.clone();
        handles.push(thread::spawn(move || Agent::new(id, &run, &cfg)?.run()));
    }

    let mut merged = ConnectionStats::new();
    let mut measured_secs = 0.0f64;
    for handle in handles {
        let result = handle
            .join()
            .map_err(|_| BenchError::Agent("worker thread panicked".into()))??;
        merged.merge(&result.stats);
        measured_secs = measured_secs.max(result.measured_secs);
    }
    Ok(AgentResult {
        stats: merged,
        measured_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Distribution;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    /// Minimal text-protocol responder: END for every GET, STORED for
    /// every SET, silence for DELETE (the client never reads its reply).
    fn serve(mut stream: TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        let mut need_value: Option<usize> = None;
        loop {
            loop {
                if let Some(len) = need_value {
                    if buf.len() < len + 2 {
                        break;
                    }
                    buf.drain(..len + 2);
                    need_value = None;
                    if stream.write_all(b"STORED\r\n").is_err() {
                        return;
                    }
                    continue;
                }
                let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") else {
                    break;
                };
                let line = buf[..pos].to_vec();
                buf.drain(..pos + 2);
                if line.starts_with(b"get") {
                    if stream.write_all(b"END\r\n").is_err() {
                        return;
                    }
                } else if line.starts_with(b"set") {
                    let len = std::str::from_utf8(&line)
                        .ok()
                        .and_then(|s| s.split_ascii_whitespace().last())
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(0);
                    need_value = Some(len);
                }
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn spawn_mini_server(expected_conns: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for _ in 0..expected_conns {
                match listener.accept() {
                    Ok((stream, _)) => {
                        thread::spawn(move || serve(stream));
                    }
                    Err(_) => return,
                }
            }
        });
        port
    }

    fn mini_run(port: u16, connections: usize) -> RunConfig {
        RunConfig {
            server: "127.0.0.1".into(),
            port,
            threads: 1,
            connections_per_thread: connections,
            json: None,
            quiet: true,
        }
    }

    #[test]
    fn test_agent_loads_and_measures_against_mini_server() {
        let port = spawn_mini_server(2);
        let cfg = ConnectionConfig {
            records: 40,
            loader_chunk: 8,
            depth: 4,
            time_secs: 0.3,
            valuesize: Distribution::Fixed { value: 16.0 },
            keysize: Distribution::Fixed { value: 8.0 },
            ia: Distribution::Fixed { value: 0.0 },
            ..ConnectionConfig::default()
        };

        let agent = Agent::new(0, &mini_run(port, 2), &cfg).unwrap();
        let result = agent.run().unwrap();

        assert!(result.stats.gets > 0, "no GETs completed");
        assert_eq!(result.stats.gets, result.stats.get_misses);
        assert!(result.measured_secs >= 0.3);
        // Every connection capped its in-flight window.
        assert!(result.stats.avg_depth() <= 4.0);
    }

    #[test]
    fn test_agent_loadonly_stops_after_loading() {
        let port = spawn_mini_server(1);
        let cfg = ConnectionConfig {
            records: 25,
            loader_chunk: 5,
            loadonly: true,
            valuesize: Distribution::Fixed { value: 8.0 },
            keysize: Distribution::Fixed { value: 8.0 },
            ..ConnectionConfig::default()
        };

        let result = Agent::new(0, &mini_run(port, 1), &cfg)
            .unwrap()
            .run()
            .unwrap();
        // Loading traffic is not sampled.
        assert_eq!(result.stats.completed(), 0);
        assert_eq!(result.measured_secs, 0.0);
    }

    // Requires a memcached server on 127.0.0.1:11211.
    #[test]
    #[ignore]
    fn test_against_real_memcached() {
        let cfg = ConnectionConfig {
            records: 1000,
            time_secs: 1.0,
            update: 0.1,
            ..ConnectionConfig::default()
        };
        let result = run_agents(&mini_run(11211, 2), &cfg).unwrap();
        assert!(result.stats.completed() > 0);
    }
}
