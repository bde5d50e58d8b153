//! Single-threaded cooperative multiplexer. Owners register the fds they
//! want driven; the daemon's top-level loop asks for a batch of ready fds
//! and routes each one back to its owner. Registration mistakes are
//! programmer errors and abort.

use ::log::{debug, error};
use ::nix::errno::Errno;
use ::nix::poll::{poll, PollFd, PollFlags};
use ::std::collections::BTreeMap;
use ::std::os::unix::io::RawFd;

const MAX_EVENTS: usize = 10;
const TIMEOUT_MS: i32 = 500;

/// A registration handle: a tag naming the owner plus the fds it owns.
/// Never an owning reference to the subscriber itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    tag: String,
    fds: Vec<RawFd>,
}

impl Subscriber {
    pub fn new(tag: impl Into<String>, fds: Vec<RawFd>) -> Subscriber {
        Subscriber {
            tag: tag.into(),
            fds,
        }
    }

    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }
}

pub struct EventLoop {
    // BTreeMap keeps the poll order deterministic.
    subscribers: BTreeMap<RawFd, String>,
}

impl EventLoop {
    pub fn new() -> EventLoop {
        EventLoop {
            subscribers: BTreeMap::new(),
        }
    }

    pub fn add_subscriber(&mut self, sub: &Subscriber) {
        for &fd in sub.fds() {
            if self.subscribers.contains_key(&fd) {
                panic!("event loop already contains fd {}; cannot add twice", fd);
            }
            debug!("adding subscriber {:?}: fd={}", sub.tag, fd);
            self.subscribers.insert(fd, sub.tag.clone());
        }
    }

    pub fn remove_subscriber(&mut self, sub: &Subscriber) {
        for &fd in sub.fds() {
            match self.subscribers.get(&fd) {
                None => panic!("event loop does not contain fd {}; cannot remove", fd),
                Some(tag) if *tag != sub.tag => {
                    panic!(
                        "fd {} belongs to subscriber {:?}, not {:?}",
                        fd, tag, sub.tag
                    );
                }
                Some(_) => {
                    debug!("removing subscriber {:?}: fd={}", sub.tag, fd);
                    self.subscribers.remove(&fd);
                }
            }
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.subscribers.contains_key(&fd)
    }

    /// Wait up to 500 ms and return up to 10 ready fds. Spurious wait errors
    /// are logged and yield an empty batch; the caller just loops again.
    pub fn wait(&self) -> Vec<RawFd> {
        let fds: Vec<RawFd> = self.subscribers.keys().copied().collect();
        let mut pollfds: Vec<PollFd> = fds
            .iter()
            .map(|&fd| PollFd::new(fd, PollFlags::POLLIN))
            .collect();

        match poll(&mut pollfds, TIMEOUT_MS) {
            Ok(0) => Vec::new(),
            Ok(_) => {
                let ready = PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP;
                fds.iter()
                    .zip(pollfds.iter())
                    .filter(|(_, p)| p.revents().map_or(false, |r| r.intersects(ready)))
                    .map(|(&fd, _)| fd)
                    .take(MAX_EVENTS)
                    .collect()
            }
            Err(e) if e.as_errno() == Some(Errno::EINTR) => {
                debug!("poll interrupted");
                Vec::new()
            }
            Err(e) => {
                error!("poll failure: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::nix::unistd::{close, pipe, write};

    struct Pipe(RawFd, RawFd);
    impl Drop for Pipe {
        fn drop(&mut self) {
            let _ = close(self.0);
            let _ = close(self.1);
        }
    }

    fn make_pipe() -> Pipe {
        let (r, w) = pipe().unwrap();
        Pipe(r, w)
    }

    #[test]
    fn ready_fd_is_reported() {
        let p = make_pipe();
        let mut ev = EventLoop::new();
        ev.add_subscriber(&Subscriber::new("test", vec![p.0]));
        write(p.1, b"x").unwrap();
        assert_eq!(ev.wait(), vec![p.0]);
    }

    #[test]
    fn removed_fd_is_forgotten() {
        let p = make_pipe();
        let mut ev = EventLoop::new();
        let sub = Subscriber::new("test", vec![p.0]);
        ev.add_subscriber(&sub);
        assert!(ev.contains(p.0));
        ev.remove_subscriber(&sub);
        assert!(!ev.contains(p.0));
    }

    #[test]
    #[should_panic(expected = "cannot add twice")]
    fn double_registration_aborts() {
        let p = make_pipe();
        let mut ev = EventLoop::new();
        ev.add_subscriber(&Subscriber::new("a", vec![p.0]));
        ev.add_subscriber(&Subscriber::new("b", vec![p.0]));
    }

    #[test]
    #[should_panic(expected = "belongs to subscriber")]
    fn mismatched_removal_aborts() {
        let p = make_pipe();
        let mut ev = EventLoop::new();
        ev.add_subscriber(&Subscriber::new("a", vec![p.0]));
        ev.remove_subscriber(&Subscriber::new("b", vec![p.0]));
    }
}
