use crate::collector::{Clock, OutputChannel};
use crate::executor::ExecutionBackend;
use crate::shell::{Elevation, Invocation};
use crate::transport::RemoteFs;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Clock that only moves when told to; sleeping advances it instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}

#[derive(Debug)]
enum Event {
    Data(Vec<u8>),
    Stderr(Vec<u8>),
    Close(Option<u32>),
}

/// A channel whose traffic is laid out up front. Without a clock every event
/// is available immediately; with one, events become visible at their due time.
#[derive(Debug)]
pub struct ScriptedChannel {
    events: VecDeque<(Duration, Event)>,
    cursor: Duration,
    pending: VecDeque<u8>,
    stderr: Vec<u8>,
    exit: Option<u32>,
    closed: bool,
    endless: Option<Vec<u8>>,
    clock: Option<ManualClock>,
    read_cost: Duration,
    largest_read: usize,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            cursor: Duration::ZERO,
            pending: VecDeque::new(),
            stderr: Vec::new(),
            exit: None,
            closed: false,
            endless: None,
            clock: None,
            read_cost: Duration::ZERO,
            largest_read: 0,
            close_counter: None,
        }
    }

    pub fn closed() -> Self {
        let mut channel = Self::new();
        channel.events.push_back((Duration::ZERO, Event::Close(None)));
        channel
    }

    /// Never ready, never closed.
    pub fn silent() -> Self {
        Self::new()
    }

    /// Always ready with `chunk`, never closed.
    pub fn endless(chunk: &str) -> Self {
        let mut channel = Self::new();
        channel.endless = Some(chunk.as_bytes().to_vec());
        channel
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.cursor += delay;
        self
    }

    pub fn data(self, text: &str) -> Self {
        self.raw(text.as_bytes())
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.events.push_back((self.cursor, Event::Data(bytes.to_vec())));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.events
            .push_back((self.cursor, Event::Stderr(text.as_bytes().to_vec())));
        self
    }

    pub fn finish(mut self, exit_status: u32) -> Self {
        self.events
            .push_back((self.cursor, Event::Close(Some(exit_status))));
        self
    }

    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Each non-empty read advances the attached clock by `cost`.
    pub fn read_cost(mut self, cost: Duration) -> Self {
        self.read_cost = cost;
        self
    }

    pub fn count_closes(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.close_counter = Some(counter);
        self
    }

    pub fn largest_read(&self) -> usize {
        self.largest_read
    }

    fn pump(&mut self) {
        let now = self.clock.as_ref().map(ManualClock::elapsed);
        while let Some((due, _)) = self.events.front() {
            if now.is_some_and(|now| *due > now) {
                break;
            }
            let Some((_, event)) = self.events.pop_front() else {
                break;
            };
            match event {
                Event::Data(bytes) => self.pending.extend(bytes),
                Event::Stderr(bytes) => self.stderr.extend(bytes),
                Event::Close(status) => {
                    self.exit = status;
                    self.closed = true;
                }
            }
        }
    }
}

impl OutputChannel for ScriptedChannel {
    fn recv_ready(&mut self) -> bool {
        self.pump();
        self.endless.is_some() || !self.pending.is_empty()
    }

    fn recv(&mut self, max: usize) -> crate::Result<Vec<u8>> {
        let bytes: Vec<u8> = match &self.endless {
            Some(chunk) => chunk[..chunk.len().min(max)].to_vec(),
            None => {
                let take = self.pending.len().min(max);
                self.pending.drain(..take).collect()
            }
        };
        self.largest_read = self.largest_read.max(bytes.len());
        if let (Some(clock), false) = (&self.clock, bytes.is_empty()) {
            clock.advance(self.read_cost);
        }
        Ok(bytes)
    }

    fn is_exhausted(&mut self) -> bool {
        self.pump();
        self.closed && self.pending.is_empty() && self.endless.is_none()
    }

    fn exit_status(&self) -> Option<u32> {
        self.exit
    }

    fn take_stderr(&mut self) -> Vec<u8> {
        self.pump();
        std::mem::take(&mut self.stderr)
    }

    async fn close(self) -> crate::Result<()> {
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FsState {
    files: HashMap<String, (Vec<u8>, u32)>,
    dirs: HashSet<String>,
    mkdir_calls: usize,
    read_calls: usize,
}

/// Remote filesystem held in memory. Writes require the parent directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<FsState>>,
    mkdir_error: Option<io::ErrorKind>,
    mkdir_race: Option<io::ErrorKind>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_mkdir(mut self, kind: io::ErrorKind) -> Self {
        self.mkdir_error = Some(kind);
        self
    }

    /// Another client creates each directory between our `stat` and `mkdir`,
    /// so `mkdir` fails with `kind` although the directory is then present.
    pub fn concurrent_mkdir(mut self, kind: io::ErrorKind) -> Self {
        self.mkdir_race = Some(kind);
        self
    }

    pub fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(path)
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn put(&self, path: &str, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (contents.as_bytes().to_vec(), 0o644));
    }

    pub fn mkdir_calls(&self) -> usize {
        self.state.lock().unwrap().mkdir_calls
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().unwrap().read_calls
    }

    fn not_found(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
    }
}

fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|p| !p.is_empty())
}

impl RemoteFs for MemoryFs {
    async fn stat(&self, path: &str) -> io::Result<u32> {
        let state = self.state.lock().unwrap();
        if let Some((_, mode)) = state.files.get(path) {
            return Ok(*mode);
        }
        let racing = self.mkdir_race.is_some() && state.mkdir_calls == 0;
        if !racing && state.dirs.contains(path) {
            return Ok(0o040755);
        }
        Err(Self::not_found(path))
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mkdir_calls += 1;
        if let Some(kind) = self.mkdir_error {
            return Err(io::Error::new(kind, "mkdir refused"));
        }
        if let Some(kind) = self.mkdir_race {
            state.dirs.insert(path.to_string());
            return Err(io::Error::new(kind, "Failure"));
        }
        if !state.dirs.insert(path.to_string()) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "exists"));
        }
        Ok(())
    }

    async fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(dir) = parent(path) {
            if !state.dirs.contains(dir) {
                return Err(Self::not_found(dir));
            }
        }
        let mode = state.files.get(path).map(|(_, m)| *m).unwrap_or(0o644);
        state
            .files
            .insert(path.to_string(), (contents.to_vec(), mode));
        Ok(())
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.read_calls += 1;
        state
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.files.get_mut(path) {
            Some((_, m)) => {
                *m = mode;
                Ok(())
            }
            None => Err(Self::not_found(path)),
        }
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }
}

type Responder = Box<dyn FnMut(&Invocation, &MemoryFs) -> ScriptedChannel + Send>;

/// Execution backend that records invocations and answers through a responder.
pub struct FakeBackend {
    pub fs: MemoryFs,
    pub invocations: Vec<Invocation>,
    pub closed_channels: Arc<AtomicUsize>,
    secret: Option<String>,
    responder: Responder,
    refuse_channels: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            fs: MemoryFs::new(),
            invocations: Vec::new(),
            closed_channels: Arc::new(AtomicUsize::new(0)),
            secret: None,
            responder: Box::new(|_, _| ScriptedChannel::new().finish(0)),
            refuse_channels: false,
        }
    }

    pub fn respond<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&Invocation, &MemoryFs) -> ScriptedChannel + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn refuse_channels(mut self) -> Self {
        self.refuse_channels = true;
        self
    }

    /// Emulates `sh` running a staged script made of `echo` lines.
    pub fn run_echo_script(fs: &MemoryFs, path: &str) -> String {
        fs.contents(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().strip_prefix("echo "))
            .map(|rest| format!("{}\n", rest.trim_matches(|c| c == '"' || c == '\'')))
            .collect()
    }
}

impl ExecutionBackend for FakeBackend {
    type Channel = ScriptedChannel;
    type Fs = MemoryFs;

    async fn open_channel(&mut self, invocation: &Invocation) -> crate::Result<ScriptedChannel> {
        if self.refuse_channels {
            return Err(crate::Error::ConnectionError("channel refused".to_string()));
        }
        self.invocations.push(invocation.clone());
        let channel = (self.responder)(invocation, &self.fs);
        Ok(channel.count_closes(self.closed_channels.clone()))
    }

    async fn remote_fs(&mut self) -> crate::Result<MemoryFs> {
        Ok(self.fs.clone())
    }

    fn elevation(&self) -> Option<Elevation> {
        self.secret.clone().map(|password| Elevation {
            login: "fake".to_string(),
            password,
        })
    }
}
