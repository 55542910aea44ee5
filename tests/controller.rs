//! Controller behaviour against real processes.

use std::{
    fs,
    os::unix::process::ExitStatusExt,
    path::Path,
    sync::mpsc::Receiver,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::{getpgid, Pid},
};
use watchrun::{
    controller::{ExitWatch, KillRequests, ProcessController, RunRequests, Transition},
    error::{Error, Result},
    logging::Logger,
};

const TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    runs: RunRequests,
    kills: KillRequests,
    transitions: Receiver<Transition>,
    handle: JoinHandle<Result<()>>,
}

fn start(script: &str, watch: ExitWatch) -> Running {
    let cmd = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    let mut controller = ProcessController::new(cmd, Logger::discard()).exit_watch(watch);
    let transitions = controller.subscribe();
    let runs = controller.run_requests();
    let kills = controller.kill_requests();
    let handle = thread::spawn(move || controller.run());

    Running {
        runs,
        kills,
        transitions,
        handle,
    }
}

impl Running {
    fn next(&self) -> Transition {
        self.transitions
            .recv_timeout(TIMEOUT)
            .expect("no transition in time")
    }

    fn spawned(&self) -> u32 {
        match self.next() {
            Transition::Spawned { pid } => pid,
            other => panic!("expected a spawn, got {:?}", other),
        }
    }

    fn exited(&self) -> std::process::ExitStatus {
        loop {
            match self.next() {
                Transition::Exited { status, .. } => return status,
                Transition::Signalled { .. } => continue,
                other => panic!("expected an exit, got {:?}", other),
            }
        }
    }

    fn join(self) -> Result<()> {
        self.handle.join().expect("controller panicked")
    }
}

fn wait_for_file(path: &Path) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            if content.ends_with('\n') {
                return content.trim().to_string();
            }
        }
        assert!(Instant::now() < deadline, "{} never written", path.display());
        thread::sleep(Duration::from_millis(10));
    }
}

fn gone(pid: Pid) -> bool {
    // orphans are reaped by init, possibly late or never in a container
    let deadline = Instant::now() + TIMEOUT;
    let stat = format!("/proc/{}/stat", pid);
    while Instant::now() < deadline {
        if kill(pid, None) == Err(nix::Error::Sys(Errno::ESRCH)) {
            return true;
        }
        if let Ok(stat) = fs::read_to_string(&stat) {
            let state = stat.rsplit(") ").next().and_then(|rest| rest.chars().next());
            if state == Some('Z') {
                return true;
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn exit_codes_are_informational() {
    let running = start("exit 3", ExitWatch::Blocking);

    running.runs.request().unwrap();
    running.spawned();
    assert_eq!(running.exited().code(), Some(3));

    running.runs.request().unwrap();
    running.spawned();
    assert_eq!(running.exited().code(), Some(3));

    running.kills.request().unwrap();
    assert_eq!(running.next(), Transition::Finished);
    running.join().unwrap();
}

#[test]
fn termination_reaches_the_whole_group() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("grandchild");
    let script = format!(
        "sleep 30 & echo $! > {}; wait",
        pidfile.display()
    );
    let running = start(&script, ExitWatch::Blocking);

    running.runs.request().unwrap();
    let pid = running.spawned() as i32;
    let grandchild: i32 = wait_for_file(&pidfile).parse().unwrap();
    assert_eq!(
        getpgid(Some(Pid::from_raw(grandchild))).unwrap(),
        Pid::from_raw(pid)
    );

    running.kills.request().unwrap();
    assert_eq!(
        running.next(),
        Transition::Signalled {
            target: Pid::from_raw(-pid),
            signal: Signal::SIGTERM,
        }
    );
    assert_eq!(running.exited().signal(), Some(Signal::SIGTERM as i32));
    assert_eq!(running.next(), Transition::Finished);
    running.join().unwrap();

    assert!(gone(Pid::from_raw(grandchild)), "grandchild survived");
}

#[test]
fn stubborn_command_is_killed_on_second_request() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let script = format!(
        "trap '' TERM; echo $$ > {}; while :; do sleep 1; done",
        ready.display()
    );
    let running = start(&script, ExitWatch::Poll(Duration::from_millis(5)));

    running.runs.request().unwrap();
    let pid = running.spawned();
    assert_eq!(wait_for_file(&ready), pid.to_string());

    running.kills.request().unwrap();
    match running.next() {
        Transition::Signalled { signal, .. } => assert_eq!(signal, Signal::SIGTERM),
        other => panic!("expected SIGTERM, got {:?}", other),
    }

    // SIGTERM is ignored, the command keeps running
    thread::sleep(Duration::from_millis(200));
    running.kills.request().unwrap();
    match running.next() {
        Transition::Signalled { signal, .. } => assert_eq!(signal, Signal::SIGKILL),
        other => panic!("expected SIGKILL, got {:?}", other),
    }

    assert_eq!(running.exited().signal(), Some(Signal::SIGKILL as i32));
    assert_eq!(running.next(), Transition::Finished);
    running.join().unwrap();
}

#[test]
fn missing_program_is_a_spawn_error() {
    let mut controller = ProcessController::new(
        vec!["/nonexistent/watchrun-test-program".to_string()],
        Logger::discard(),
    );
    let transitions = controller.subscribe();
    let runs = controller.run_requests();
    let handle = thread::spawn(move || controller.run());

    runs.request().unwrap();
    assert_eq!(
        transitions.recv_timeout(TIMEOUT).unwrap(),
        Transition::Finished
    );

    match handle.join().unwrap() {
        Err(Error::Spawn { cmd, .. }) => {
            assert_eq!(cmd, vec!["/nonexistent/watchrun-test-program"])
        }
        other => panic!("expected a spawn error, got {:?}", other),
    }
    assert!(runs.request().is_err());
}
