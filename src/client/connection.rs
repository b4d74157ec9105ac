//! Per-connection client engine
//!
//! One `Connection` drives one TCP or UDP flow: the write side paces
//! request issue against a Poisson arrival clock under a depth cap, the
//! read side walks an incremental decoder over the response stream and
//! completes operations strictly in issue order. All transitions run to
//! completion between readiness events; the poll driver only feeds bytes
//! in, flushes bytes out, and fires the armed timer.

use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::time::Duration;

use mio::{Registry, Token};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::metrics::ConnectionStats;
use crate::protocol::{binary, text};
use crate::utils::error::{BenchError, ConnectionError, ProtocolError, Result};
use crate::utils::time;
use crate::workload::{random_data, Distribution, KeyGenerator, MixCase};

use super::op_queue::{OpKind, OpQueue, Operation};
use super::transport::{RecvBuffer, Transport};

/// Minimum gap between the last response and the next issue under
/// moderation.
const MODERATE_GAP: f64 = 0.000_25;

/// An issue this far behind its arrival slot counts as late for the
/// catch-up rule, which then advances the clock to within `SKIP_SLACK`.
const SKIP_LATE: f64 = 0.005;
const SKIP_SLACK: f64 = 0.004;

/// Datagram loss watchdog for the loading phase.
const UDP_READ_TIMEOUT: f64 = 3.0;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    InitRead,
    Loading,
    Idle,
    WaitingForSasl,
    WaitingForGet,
    WaitingForGetData,
    WaitingForEnd,
    WaitingForSet,
    WaitingForDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    InitWrite,
    Issuing,
    WaitingForTime,
    WaitingForOpq,
}

/// Outcome of a line while waiting for a text GET reply.
enum GetReply {
    Miss,
    Value(usize),
}

pub struct Connection {
    cfg: ConnectionConfig,
    transport: Transport,
    rbuf: RecvBuffer,
    scratch: Vec<u8>,
    value_buf: Vec<u8>,

    read_state: ReadState,
    write_state: WriteState,
    op_queue: OpQueue,

    rng: fastrand::Rng,
    keygen: KeyGenerator,
    iagen: Distribution,

    /// Keys known present / known absent on the server. A key never sits
    /// in both pools at once.
    loaded: HashSet<u64>,
    absent: VecDeque<u64>,

    /// When the measured phase began.
    start_time: f64,
    /// Arrival clock: when the next issue is due.
    next_time: f64,
    last_tx: f64,
    last_rx: f64,
    /// Payload length parsed off the current VALUE header.
    data_length: usize,

    loader_issued: u64,
    loader_completed: u64,

    /// Single-shot timer deadline, absolute seconds.
    timer_at: Option<f64>,
    /// Loading-phase datagram watchdog, absolute seconds.
    udp_deadline: Option<f64>,

    pub stats: ConnectionStats,
}

impl Connection {
    /// Connect to the server and run the connected-edge transitions
    /// (Nagle, SASL). The TCP connect is synchronous; the socket is
    /// non-blocking from here on.
    pub fn connect(host: &str, port: u16, cfg: ConnectionConfig) -> Result<Self> {
        let transport = if cfg.udp {
            Transport::connect_udp(host, port)?
        } else {
            Transport::connect_tcp(host, port, CONNECT_TIMEOUT, !cfg.no_nodelay)?
        };

        let mut iagen = cfg.ia.clone();
        if cfg.lambda > 0.0 {
            iagen.set_rate(cfg.lambda);
        } else {
            iagen = Distribution::Fixed { value: 0.0 };
        }
        let keygen = KeyGenerator::new(cfg.keysize.clone(), cfg.records);
        let rng = fastrand::Rng::with_seed(cfg.seed);

        let mut conn = Self {
            transport,
            rbuf: RecvBuffer::new(),
            scratch: Vec::with_capacity(4096),
            value_buf: Vec::with_capacity(4096),
            read_state: ReadState::InitRead,
            write_state: WriteState::InitWrite,
            op_queue: OpQueue::with_depth(cfg.depth),
            rng,
            keygen,
            iagen,
            loaded: HashSet::new(),
            absent: VecDeque::new(),
            start_time: 0.0,
            next_time: 0.0,
            last_tx: 0.0,
            last_rx: 0.0,
            data_length: 0,
            loader_issued: 0,
            loader_completed: 0,
            timer_at: None,
            udp_deadline: None,
            stats: ConnectionStats::new(),
            cfg,
        };
        conn.on_connected()?;
        Ok(conn)
    }

    fn on_connected(&mut self) -> Result<()> {
        if self.transport.is_udp() {
            self.read_state = ReadState::Idle;
            self.udp_deadline = Some(time::now() + UDP_READ_TIMEOUT);
        } else if self.cfg.sasl {
            self.issue_sasl()?;
        } else {
            self.read_state = ReadState::Idle;
        }
        Ok(())
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        self.transport.register(registry, token)?;
        Ok(())
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn queue_len(&self) -> usize {
        self.op_queue.len()
    }

    /// When the last request was issued.
    pub fn last_tx(&self) -> f64 {
        self.last_tx
    }

    pub fn take_stats(&mut self) -> ConnectionStats {
        std::mem::take(&mut self.stats)
    }

    // ----- lifecycle -------------------------------------------------

    /// Begin pre-populating keys `0..records`, `loader_chunk` at a time.
    pub fn start_loading(&mut self, now: f64) -> Result<()> {
        self.read_state = ReadState::Loading;
        self.loader_issued = 0;
        self.loader_completed = 0;
        for _ in 0..self.cfg.loader_chunk {
            if self.loader_issued >= self.cfg.records {
                break;
            }
            let key = self.keygen.render(self.loader_issued);
            self.issue_set(&key, self.loader_issued, now)?;
            self.loader_issued += 1;
        }
        Ok(())
    }

    pub fn loading_done(&self) -> bool {
        self.read_state != ReadState::Loading
    }

    pub fn loader_completed(&self) -> u64 {
        self.loader_completed
    }

    /// Seed the absent pool with the whole key universe. Must run before
    /// a mixed workload that touches absent keys, on a server that does
    /// not hold them.
    pub fn note_absent_keys(&mut self) {
        for index in 0..self.cfg.records {
            self.absent.push_back(index);
        }
    }

    /// Clear per-phase state between loading and measurement. Pools and
    /// the transport survive; samples collected so far do not.
    pub fn reset(&mut self) {
        debug_assert!(self.op_queue.is_empty());
        self.timer_at = None;
        self.read_state = ReadState::Idle;
        self.write_state = WriteState::InitWrite;
        self.stats = ConnectionStats::new();
    }

    /// Enter the measured phase and start the write machine.
    pub fn begin_measurement(&mut self, now: f64) -> Result<()> {
        self.start_time = now;
        self.drive_write_machine(now)
    }

    pub fn check_exit_condition(&self, now: f64) -> bool {
        if self.read_state == ReadState::InitRead {
            return false;
        }
        if now > self.start_time + self.cfg.time_secs {
            return true;
        }
        if self.cfg.loadonly && self.read_state == ReadState::Idle {
            return true;
        }
        false
    }

    // ----- timer and readiness edges --------------------------------

    /// Deadline the poll driver should honor, if any.
    pub fn timer_deadline(&self) -> Option<f64> {
        match (self.timer_at, self.udp_deadline) {
            (Some(t), Some(u)) => Some(t.min(u)),
            (t, u) => t.or(u),
        }
    }

    fn arm_timer(&mut self, at: f64) {
        self.timer_at = Some(at);
    }

    /// Fire the single-shot timer if it has expired.
    pub fn fire_timer(&mut self, now: f64) -> Result<()> {
        if matches!(self.timer_at, Some(at) if at <= now) {
            self.timer_at = None;
            self.drive_write_machine(now)?;
        }
        self.check_udp_watchdog(now);
        Ok(())
    }

    /// Recover from datagram loss during loading: whatever has not been
    /// answered in `UDP_READ_TIMEOUT` seconds never will be.
    fn check_udp_watchdog(&mut self, now: f64) {
        let expired = matches!(self.udp_deadline, Some(at) if at <= now);
        if !expired {
            return;
        }
        self.udp_deadline = Some(now + UDP_READ_TIMEOUT);
        if self.read_state == ReadState::Loading && self.loader_completed != self.loader_issued {
            warn!(
                issued = self.loader_issued,
                completed = self.loader_completed,
                "UDP read timeout during loading, forcing completion"
            );
            self.loader_completed = self.loader_issued;
            self.op_queue.drain();
            self.read_state = ReadState::Idle;
        }
    }

    /// Readable edge: drain the socket and run the read machine.
    pub fn on_readable(&mut self) -> Result<()> {
        match self.transport.fill(&mut self.rbuf) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(ConnectionError::Closed.into())
            }
            Err(e) => return Err(e.into()),
        }
        if self.transport.is_udp() {
            self.udp_deadline = Some(time::now() + UDP_READ_TIMEOUT);
        }
        self.process_reads()
    }

    /// Writable edge: push buffered output.
    pub fn on_writable(&mut self) -> Result<()> {
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.transport.flush()?;
        Ok(())
    }

    // ----- read state machine ---------------------------------------

    /// Consume as many complete responses as the buffer holds.
    pub fn process_reads(&mut self) -> Result<()> {
        let result = self.read_loop();
        self.rbuf.compact();
        result
    }

    fn read_loop(&mut self) -> Result<()> {
        loop {
            match self.read_state {
                ReadState::InitRead => return Err(ConnectionError::NotConnected.into()),

                // Munched all the data we expected.
                ReadState::Idle => return Ok(()),

                ReadState::WaitingForSasl => {
                    let Some((header, total)) = binary::peek_response(self.rbuf.data()) else {
                        return Ok(());
                    };
                    if header.status != 0 {
                        return Err(ConnectionError::SaslFailed(header.status).into());
                    }
                    self.rbuf.consume(total);
                    self.stats.rx_bytes += total as u64;
                    debug!("SASL authentication succeeded");
                    self.read_state = ReadState::Idle;
                }

                // Binary collapses the whole GET reply into one frame.
                ReadState::WaitingForGet if self.cfg.binary => {
                    let Some((header, total)) = binary::peek_response(self.rbuf.data()) else {
                        return Ok(());
                    };
                    if header.status != 0 {
                        self.stats.get_misses += 1;
                    }
                    self.rbuf.consume(total);
                    self.stats.rx_bytes += total as u64;
                    self.complete_head()?;
                }

                ReadState::WaitingForGet => {
                    let step = match text::read_line(self.rbuf.data()) {
                        None => return Ok(()),
                        Some((line, used)) => {
                            if line == b"END" {
                                (GetReply::Miss, used)
                            } else if line.starts_with(b"VALUE") {
                                let len = text::parse_value_header(line)?;
                                (GetReply::Value(len), used)
                            } else {
                                return Err(ProtocolError::UnexpectedGetLine(
                                    String::from_utf8_lossy(line).into_owned(),
                                )
                                .into());
                            }
                        }
                    };
                    let (reply, used) = step;
                    self.rbuf.consume(used);
                    self.stats.rx_bytes += used as u64;
                    match reply {
                        GetReply::Miss => {
                            self.stats.get_misses += 1;
                            self.complete_head()?;
                        }
                        GetReply::Value(len) => {
                            self.data_length = len;
                            self.read_state = ReadState::WaitingForGetData;
                        }
                    }
                }

                ReadState::WaitingForGetData => {
                    let need = self.data_length + 2;
                    if self.rbuf.len() < need {
                        return Ok(());
                    }
                    // Payload bytes are drained, not inspected.
                    self.rbuf.consume(need);
                    self.stats.rx_bytes += need as u64;
                    self.read_state = ReadState::WaitingForEnd;
                }

                ReadState::WaitingForEnd => {
                    let used = match text::read_line(self.rbuf.data()) {
                        None => return Ok(()),
                        Some((line, used)) if line == b"END" => used,
                        Some((line, _)) => {
                            return Err(ProtocolError::UnexpectedEndLine(
                                String::from_utf8_lossy(line).into_owned(),
                            )
                            .into());
                        }
                    };
                    self.rbuf.consume(used);
                    self.stats.rx_bytes += used as u64;
                    self.complete_head()?;
                }

                ReadState::WaitingForSet => {
                    if self.cfg.binary {
                        let Some((_, total)) = binary::peek_response(self.rbuf.data()) else {
                            return Ok(());
                        };
                        self.rbuf.consume(total);
                        self.stats.rx_bytes += total as u64;
                    } else {
                        let Some((_, used)) = text::read_line(self.rbuf.data()) else {
                            return Ok(());
                        };
                        self.rbuf.consume(used);
                        self.stats.rx_bytes += used as u64;
                    }
                    self.complete_head()?;
                }

                // The text protocol answers DELETE, but this client never
                // waited for that line and the behavior is kept.
                ReadState::WaitingForDelete => {
                    self.complete_head()?;
                }

                ReadState::Loading => {
                    if self.cfg.binary {
                        let Some((_, total)) = binary::peek_response(self.rbuf.data()) else {
                            return Ok(());
                        };
                        self.rbuf.consume(total);
                        self.stats.rx_bytes += total as u64;
                    } else {
                        let Some((_, used)) = text::read_line(self.rbuf.data()) else {
                            return Ok(());
                        };
                        self.rbuf.consume(used);
                    }
                    self.loader_ack()?;
                }
            }
        }
    }

    /// One loading-phase SET acknowledged: count it and keep the pipeline
    /// topped up to `loader_completed + loader_chunk`.
    fn loader_ack(&mut self) -> Result<()> {
        self.loader_completed += 1;
        self.op_queue.pop();

        if self.loader_completed == self.cfg.records {
            debug!(records = self.cfg.records, "finished loading");
            self.read_state = ReadState::Idle;
            return Ok(());
        }

        let now = time::now();
        while self.loader_issued < self.loader_completed + self.cfg.loader_chunk {
            if self.loader_issued >= self.cfg.records {
                break;
            }
            if self.loader_issued % self.cfg.loader_chunk == 0 && self.cfg.rate_delay_us > 0 {
                std::thread::sleep(Duration::from_micros(self.cfg.rate_delay_us));
            }
            let key = self.keygen.render(self.loader_issued);
            self.issue_set(&key, self.loader_issued, now)?;
            self.loader_issued += 1;
        }
        Ok(())
    }

    /// Complete the head-of-queue operation: stamp it, hand the sample to
    /// the stats sink, advance the read state to the next queued op, and
    /// give the write machine a chance to refill the slot.
    fn complete_head(&mut self) -> Result<()> {
        let Some(mut op) = self.op_queue.pop() else {
            return Err(BenchError::Agent("response completed with empty op queue".into()));
        };
        let now = time::now();
        op.end_time = now;
        match op.kind {
            OpKind::Get => self.stats.log_get(&op),
            OpKind::Set => self.stats.log_set(&op),
            OpKind::Delete => self.stats.log_delete(&op),
        }
        self.last_rx = now;

        self.read_state = match self.op_queue.front().map(|next| next.kind) {
            None => ReadState::Idle,
            Some(OpKind::Get) => ReadState::WaitingForGet,
            Some(OpKind::Set) => ReadState::WaitingForSet,
            Some(OpKind::Delete) => ReadState::WaitingForDelete,
        };

        self.drive_write_machine(now)
    }

    // ----- write state machine --------------------------------------

    /// Decide whether to issue the next request, given the arrival clock,
    /// the depth cap and the moderation rule. Loops until it parks.
    pub fn drive_write_machine(&mut self, now: f64) -> Result<()> {
        if self.check_exit_condition(now) {
            return Ok(());
        }

        loop {
            match self.write_state {
                WriteState::InitWrite => {
                    let delay = self.iagen.sample(&mut self.rng);
                    self.next_time = now + delay;
                    self.arm_timer(self.next_time);
                    self.write_state = WriteState::WaitingForTime;
                }

                WriteState::Issuing => {
                    if self.op_queue.len() >= self.cfg.depth {
                        self.write_state = WriteState::WaitingForOpq;
                        return Ok(());
                    } else if now < self.next_time {
                        // Run WAITING_FOR_TIME once more so the timer is
                        // armed before parking.
                        self.write_state = WriteState::WaitingForTime;
                        continue;
                    } else if self.cfg.moderate && now < self.last_rx + MODERATE_GAP {
                        self.write_state = WriteState::WaitingForTime;
                        if self.timer_at.is_none() {
                            self.arm_timer(self.last_rx + MODERATE_GAP);
                        }
                        return Ok(());
                    }

                    self.issue_something(now)?;
                    self.last_tx = now;
                    self.stats.log_op(self.op_queue.len());
                    self.next_time += self.iagen.sample(&mut self.rng);

                    if self.cfg.skip
                        && self.cfg.lambda > 0.0
                        && now - self.next_time > SKIP_LATE
                        && self.op_queue.len() >= self.cfg.depth
                    {
                        while self.next_time < now - SKIP_SLACK {
                            self.stats.skips += 1;
                            self.next_time += self.iagen.sample(&mut self.rng);
                        }
                    }
                }

                WriteState::WaitingForTime => {
                    if now < self.next_time {
                        if self.timer_at.is_none() {
                            self.arm_timer(self.next_time);
                        }
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }

                WriteState::WaitingForOpq => {
                    if self.op_queue.len() >= self.cfg.depth {
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }
            }
        }
    }

    // ----- op selection ---------------------------------------------

    /// Synthesize and issue one operation.
    fn issue_something(&mut self, now: f64) -> Result<()> {
        let index = self.rng.u64(0..self.cfg.records);
        let key = self.keygen.render(index);

        if !self.cfg.mix.is_active() {
            return if self.rng.f64() < self.cfg.update {
                self.issue_set(&key, index, now)
            } else {
                self.issue_get(&key, now)
            };
        }

        let case = self.cfg.mix.choose(&mut self.rng);
        self.stats.log_mix_case(case);
        match case {
            MixCase::SetAbsent => {
                let Some(picked) = self.absent.pop_front() else {
                    return Err(BenchError::Workload(
                        "set-absent scheduled but the absent pool is empty; \
                         seed absent keys before the mixed phase"
                            .into(),
                    ));
                };
                self.loaded.insert(picked);
                let picked_key = self.keygen.render(picked);
                self.issue_set(&picked_key, picked, now)
            }
            MixCase::SetLoadedSameSize => {
                if !self.loaded.contains(&index) {
                    self.issue_get(&key, now)
                } else {
                    self.issue_set(&key, index, now)
                }
            }
            // Distinct-size sets are not modeled yet; reads stand in.
            MixCase::SetLoadedDiffSize => self.issue_get(&key, now),
            MixCase::GetAbsent => match self.rotate_absent() {
                Some(picked) => {
                    let picked_key = self.keygen.render(picked);
                    self.issue_get(&picked_key, now)
                }
                None => self.issue_get(&key, now),
            },
            // Membership is not checked; the rendered key is read as-is.
            MixCase::GetLoaded => self.issue_get(&key, now),
            MixCase::DeleteAbsent => match self.rotate_absent() {
                Some(picked) => {
                    let picked_key = self.keygen.render(picked);
                    self.issue_delete(&picked_key, now)
                }
                None => self.issue_get(&key, now),
            },
            MixCase::DeleteLoaded => {
                if self.loaded.remove(&index) {
                    self.absent.push_back(index);
                    self.issue_delete(&key, now)
                } else {
                    self.issue_get(&key, now)
                }
            }
        }
    }

    /// Cycle the head of the absent pool to its tail.
    fn rotate_absent(&mut self) -> Option<u64> {
        let picked = self.absent.pop_front()?;
        self.absent.push_back(picked);
        Some(picked)
    }

    // ----- request issue --------------------------------------------

    fn issue_sasl(&mut self) -> Result<()> {
        self.read_state = ReadState::WaitingForSasl;
        let mut frame = std::mem::take(&mut self.scratch);
        frame.clear();
        binary::encode_sasl_plain(&mut frame, &self.cfg.username, &self.cfg.password);
        self.transport.send_frame(&frame)?;
        self.scratch = frame;
        Ok(())
    }

    fn issue_get(&mut self, key: &str, now: f64) -> Result<()> {
        self.op_queue
            .push(Operation::new(OpKind::Get, key.to_string(), now));
        if self.read_state == ReadState::Idle {
            self.read_state = ReadState::WaitingForGet;
        }

        let mut frame = std::mem::take(&mut self.scratch);
        frame.clear();
        if self.cfg.binary {
            binary::encode_get(&mut frame, key);
        } else {
            text::encode_get(&mut frame, key);
        }
        let wire = self.transport.send_frame(&frame)?;
        self.scratch = frame;

        if self.read_state != ReadState::Loading {
            self.stats.tx_bytes += wire as u64;
        }
        Ok(())
    }

    fn issue_set(&mut self, key: &str, key_index: u64, now: f64) -> Result<()> {
        self.op_queue
            .push(Operation::new(OpKind::Set, key.to_string(), now));
        if self.read_state == ReadState::Idle {
            self.read_state = ReadState::WaitingForSet;
        }

        let len = self.cfg.valuesize.sample_size(&mut self.rng);
        let mut value = std::mem::take(&mut self.value_buf);
        random_data::fill_value(key_index, len, &mut value);

        let mut frame = std::mem::take(&mut self.scratch);
        frame.clear();
        if self.cfg.binary {
            binary::encode_set(&mut frame, key, &value);
        } else {
            text::encode_set(&mut frame, key, &value);
        }
        let wire = self.transport.send_frame(&frame)?;
        self.scratch = frame;
        self.value_buf = value;

        if self.read_state != ReadState::Loading {
            self.stats.tx_bytes += wire as u64;
        }
        self.loaded.insert(key_index);
        Ok(())
    }

    fn issue_delete(&mut self, key: &str, now: f64) -> Result<()> {
        self.op_queue
            .push(Operation::new(OpKind::Delete, key.to_string(), now));
        if self.read_state == ReadState::Idle {
            self.read_state = ReadState::WaitingForDelete;
        }

        let mut frame = std::mem::take(&mut self.scratch);
        frame.clear();
        if self.cfg.binary {
            binary::encode_delete(&mut frame, key);
        } else {
            text::encode_delete(&mut frame, key);
        }
        let wire = self.transport.send_frame(&frame)?;
        self.scratch = frame;

        if self.read_state != ReadState::Loading {
            self.stats.tx_bytes += wire as u64;
        }
        Ok(())
    }

    /// Inject bytes as if the socket had produced them.
    #[cfg(test)]
    pub(crate) fn push_rx(&mut self, bytes: &[u8]) {
        self.rbuf.extend(bytes);
    }
}
