//! Broadcast command channel from the streaming coordinator to the device workers.
//!
//! A single slot holds the last posted command together with a message counter. Every
//! [`CmdRecvr`] tracks the number of the last message it has seen, so receivers can't silently
//! skip a command: falling more than one message behind is reported as an error.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CtrlError, CtrlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCmd {
    /// Run one repetition. The flag tells whether another repetition follows.
    Stream(bool),
    Close,
}

pub struct CmdChan {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>, // (msg_num, worker_cmd)
    condvar: Arc<Condvar>,
}

impl Default for CmdChan {
    fn default() -> Self {
        Self::new()
    }
}

impl CmdChan {
    pub fn new() -> Self {
        Self {
            cmd: Arc::new(Mutex::new((0, WorkerCmd::Close))),
            condvar: Arc::new(Condvar::new()),
        }
    }

    pub fn new_recvr(&self) -> CmdRecvr {
        // A receiver created after some messages were posted reacts starting from `msg_num + 1`
        let last_posted_msg_num = self.cmd.lock().0;
        CmdRecvr {
            cmd: self.cmd.clone(),
            condvar: self.condvar.clone(),
            viewed_msg_num: last_posted_msg_num,
        }
    }

    pub fn send(&self, cmd: WorkerCmd) {
        let mut guard = self.cmd.lock();
        let (msg_num, cmd_val) = &mut *guard;
        *cmd_val = cmd;
        *msg_num += 1;
        self.condvar.notify_all();
    }
}

pub struct CmdRecvr {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>,
    condvar: Arc<Condvar>,
    viewed_msg_num: usize,
}

impl CmdRecvr {
    /// Blocks until the message following the last one seen is posted and returns it.
    pub fn recv(&mut self) -> CtrlResult<WorkerCmd> {
        let mut guard = self.cmd.lock();
        // Loop guards against spurious wakeups
        while guard.0 == self.viewed_msg_num {
            self.condvar.wait(&mut guard);
        }
        let (msg_num, cmd_val) = *guard;
        if msg_num != self.viewed_msg_num + 1 {
            return Err(CtrlError::Stream(format!(
                "Viewed msg count {} diverged from the published command number {}",
                self.viewed_msg_num, msg_num
            )));
        }
        self.viewed_msg_num = msg_num;
        Ok(cmd_val)
    }
}

#[cfg(test)]
mod test {
    use crate::worker_cmd_chan::*;

    #[test]
    fn broadcast_to_all_receivers() {
        let chan = CmdChan::new();
        let mut recvrs: Vec<CmdRecvr> = (0..3).map(|_| chan.new_recvr()).collect();
        let (ack_sender, ack_recvr) = crossbeam::channel::unbounded();
        std::thread::scope(|s| {
            let handles: Vec<_> = recvrs
                .iter_mut()
                .map(|recvr| {
                    let ack_sender = ack_sender.clone();
                    s.spawn(move || {
                        let first = recvr.recv().unwrap();
                        ack_sender.send(()).unwrap();
                        (first, recvr.recv().unwrap())
                    })
                })
                .collect();
            chan.send(WorkerCmd::Stream(false));
            // Nobody may lag behind when the next command is posted
            (0..3).for_each(|_| ack_recvr.recv().unwrap());
            chan.send(WorkerCmd::Close);
            for h in handles {
                assert_eq!(h.join().unwrap(), (WorkerCmd::Stream(false), WorkerCmd::Close));
            }
        });
    }

    #[test]
    fn already_posted_message_is_returned_immediately() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        chan.send(WorkerCmd::Stream(true));
        assert_eq!(recvr.recv().unwrap(), WorkerCmd::Stream(true));
    }

    #[test]
    fn lagging_receiver_errors() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        chan.send(WorkerCmd::Stream(true));
        chan.send(WorkerCmd::Close);
        assert!(recvr.recv().is_err());

        // Receivers created late start from the current message
        let mut late = chan.new_recvr();
        chan.send(WorkerCmd::Stream(false));
        assert_eq!(late.recv().unwrap(), WorkerCmd::Stream(false));
    }
}
