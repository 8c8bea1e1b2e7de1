use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rolld::errors::{ChannelError, LaunchError};
use rolld::process::{
    BoxFuture, CloseOutcome, ExitNotifier, ExitSignal, GracefulShutdownProcess, IpcChannel,
    ManagedProcess, ProcessExit, ProcessFactory, ShutdownRequest,
};
use rolld::types::{AppDescriptor, AppId};

#[derive(Debug, Default)]
struct FakeState {
    started: bool,
    running: bool,
    exit_code: Option<i32>,
    terminate_count: u32,
    close_count: u32,
    fail_launch: bool,
}

/// Test-side remote control for one [`FakeProcess`].
#[derive(Debug, Clone)]
pub struct FakeProcessControl {
    label: String,
    state: Arc<Mutex<FakeState>>,
    notifier: Arc<ExitNotifier>,
}

impl FakeProcessControl {
    fn new(label: String, fail_launch: bool) -> Self {
        Self {
            label,
            state: Arc::new(Mutex::new(FakeState {
                fail_launch,
                ..FakeState::default()
            })),
            notifier: Arc::new(ExitNotifier::new()),
        }
    }

    /// The process exits on its own with `code`.
    pub fn exit(&self, code: i32) {
        self.mark_exited_without_notify(code);
        self.fire_exit();
    }

    pub fn crash(&self) {
        self.exit(1);
    }

    /// The process is gone but the exit notification has not been delivered
    /// yet.
    pub fn mark_exited_without_notify(&self, code: i32) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.exit_code = Some(code);
    }

    /// Deliver the pending exit notification.
    pub fn fire_exit(&self) {
        let code = self.state.lock().unwrap().exit_code;
        self.notifier.notify(ProcessExit { code, forced: false });
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn terminate_count(&self) -> u32 {
        self.state.lock().unwrap().terminate_count
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().unwrap().close_count
    }

    fn kill(&self) {
        let was_running = {
            let mut state = self.state.lock().unwrap();
            state.terminate_count += 1;
            std::mem::replace(&mut state.running, false)
        };
        if was_running {
            self.notifier.notify(ProcessExit {
                code: None,
                forced: true,
            });
        }
    }
}

/// In-memory [`ManagedProcess`] driven through its [`FakeProcessControl`].
#[derive(Debug)]
pub struct FakeProcess {
    control: FakeProcessControl,
}

impl FakeProcess {
    pub fn new(label: impl Into<String>) -> (Self, FakeProcessControl) {
        let control = FakeProcessControl::new(label.into(), false);
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }

    pub fn failing(label: impl Into<String>) -> (Self, FakeProcessControl) {
        let control = FakeProcessControl::new(label.into(), true);
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }
}

impl ManagedProcess for FakeProcess {
    fn start(&mut self) -> BoxFuture<'_, Result<(), LaunchError>> {
        Box::pin(async move {
            let mut state = self.control.state.lock().unwrap();
            if state.started {
                return Err(LaunchError::AlreadyStarted);
            }
            if state.fail_launch {
                return Err(LaunchError::BinaryMissing(PathBuf::from(&self.control.label)));
            }
            state.started = true;
            state.running = true;
            Ok(())
        })
    }

    fn is_running(&self) -> bool {
        self.control.is_running()
    }

    fn exit_code(&self) -> Option<i32> {
        self.control.state.lock().unwrap().exit_code
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.control.kill() })
    }

    fn exit_signal(&self) -> ExitSignal {
        self.control.notifier.subscribe()
    }

    fn close(&mut self) -> BoxFuture<'_, CloseOutcome> {
        Box::pin(async move {
            self.control.state.lock().unwrap().close_count += 1;
            if self.control.is_running() {
                self.control.kill();
                CloseOutcome::ForcedKill
            } else {
                CloseOutcome::AlreadyExited
            }
        })
    }
}

/// How a [`FakeIpcChannel`] peer reacts to a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelBehaviour {
    /// The peer exits with code 0.
    Ack,
    /// The request is delivered but the peer keeps running.
    Ignore,
    /// Delivery fails.
    Fail,
}

#[derive(Debug, Default)]
struct ChannelLog {
    requests: Vec<ShutdownRequest>,
    disconnects: u32,
}

#[derive(Debug, Clone)]
pub struct FakeIpcChannel {
    behaviour: ChannelBehaviour,
    peer: Option<FakeProcessControl>,
    log: Arc<Mutex<ChannelLog>>,
}

impl FakeIpcChannel {
    pub fn new(behaviour: ChannelBehaviour, peer: Option<FakeProcessControl>) -> Self {
        Self {
            behaviour,
            peer,
            log: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<ShutdownRequest> {
        self.log.lock().unwrap().requests.clone()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.log.lock().unwrap().disconnects
    }
}

impl IpcChannel for FakeIpcChannel {
    fn send<'a>(&'a self, request: &'a ShutdownRequest) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            if self.behaviour == ChannelBehaviour::Fail {
                return Err(ChannelError::Disconnected);
            }
            self.log.lock().unwrap().requests.push(*request);
            if self.behaviour == ChannelBehaviour::Ack {
                if let Some(peer) = &self.peer {
                    peer.exit(0);
                }
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().disconnects += 1;
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum FactoryMode {
    Bare,
    Graceful {
        behaviour: ChannelBehaviour,
        timeout: Duration,
    },
}

#[derive(Debug)]
pub struct Launch {
    pub descriptor: AppDescriptor,
    pub control: FakeProcessControl,
    pub channel: Option<FakeIpcChannel>,
}

#[derive(Debug, Default)]
struct FactoryState {
    launches: Vec<Launch>,
    failing: HashSet<AppId>,
}

/// [`ProcessFactory`] producing fake processes and remembering every one.
#[derive(Debug, Clone)]
pub struct FakeProcessFactory {
    mode: FactoryMode,
    state: Arc<Mutex<FactoryState>>,
}

impl FakeProcessFactory {
    /// Bare fakes: `close()` is a forced kill.
    pub fn new() -> Self {
        Self {
            mode: FactoryMode::Bare,
            state: Arc::default(),
        }
    }

    /// Fakes wrapped in the graceful-shutdown decorator over a
    /// [`FakeIpcChannel`] with `behaviour`.
    pub fn graceful(behaviour: ChannelBehaviour, timeout: Duration) -> Self {
        Self {
            mode: FactoryMode::Graceful { behaviour, timeout },
            state: Arc::default(),
        }
    }

    /// Every launch of `app_id` fails until switched back.
    pub fn fail_launches_for(&self, app_id: &AppId, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(app_id.clone());
        } else {
            state.failing.remove(app_id);
        }
    }

    /// Controls of every process created for `app_id`, oldest first.
    pub fn controls_for(&self, app_id: &AppId) -> Vec<FakeProcessControl> {
        self.state
            .lock()
            .unwrap()
            .launches
            .iter()
            .filter(|l| l.descriptor.app_id == *app_id)
            .map(|l| l.control.clone())
            .collect()
    }

    pub fn latest(&self, app_id: &AppId) -> Option<FakeProcessControl> {
        self.controls_for(app_id).pop()
    }

    /// Channel of the most recent graceful process for `app_id`.
    pub fn latest_channel(&self, app_id: &AppId) -> Option<FakeIpcChannel> {
        self.state
            .lock()
            .unwrap()
            .launches
            .iter()
            .rev()
            .find(|l| l.descriptor.app_id == *app_id)
            .and_then(|l| l.channel.clone())
    }

    /// Number of processes created for `app_id`, failed launches included.
    pub fn launch_count(&self, app_id: &AppId) -> usize {
        self.controls_for(app_id).len()
    }
}

impl Default for FakeProcessFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFactory for FakeProcessFactory {
    fn create(&self, descriptor: &AppDescriptor) -> Box<dyn ManagedProcess> {
        let mut state = self.state.lock().unwrap();
        let fail_launch = state.failing.contains(&descriptor.app_id);
        let control = FakeProcessControl::new(descriptor.to_string(), fail_launch);
        let process = FakeProcess {
            control: control.clone(),
        };

        let (boxed, channel): (Box<dyn ManagedProcess>, _) = match self.mode {
            FactoryMode::Bare => (Box::new(process), None),
            FactoryMode::Graceful { behaviour, timeout } => {
                let channel = FakeIpcChannel::new(behaviour, Some(control.clone()));
                (
                    Box::new(GracefulShutdownProcess::new(
                        descriptor.to_string(),
                        process,
                        channel.clone(),
                        timeout,
                    )),
                    Some(channel),
                )
            }
        };

        state.launches.push(Launch {
            descriptor: descriptor.clone(),
            control,
            channel,
        });
        boxed
    }
}
