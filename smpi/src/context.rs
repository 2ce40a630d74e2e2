//! Process-wide entry point.
use std::cell::RefCell;
use std::process;
use std::rc::Rc;
use log::{error, info};
use smpi_base::{Error, Provider, Rank, Result};
use crate::communicator::Communicator;
use crate::group::Group;
use crate::Handle;

/// An initialized process. Communicators created from it stay usable for as
/// long as any of them is alive.
pub struct Context {
    handle: Rc<RefCell<Handle>>,
}

impl Context {
    /// Build a context on top of a connected provider.
    pub fn new(provider: Box<dyn Provider>) -> Context {
        Context {
            handle: Rc::new(RefCell::new(Handle::new(provider))),
        }
    }

    /// Rank of this process in the world group.
    pub fn rank(&self) -> Rank {
        self.handle.borrow().rank()
    }

    /// Number of processes in the world group.
    pub fn size(&self) -> usize {
        self.handle.borrow().size()
    }

    /// Return the world communicator.
    pub fn world(&self) -> Communicator {
        let (rank, size) = {
            let handle = self.handle.borrow();
            (handle.rank(), handle.size())
        };
        Communicator::new(Rc::clone(&self.handle), Group::world(rank, size), 0, None)
    }

    /// Return the world communicator, checking that the group was started
    /// with exactly `expected` processes.
    pub fn world_with_size(&self, expected: usize) -> Result<Communicator> {
        let world = self.world();
        if world.size() != expected {
            return Err(Error::GroupSize {
                expected,
                actual: world.size(),
            });
        }
        Ok(world)
    }

    /// Seconds elapsed since initialization.
    pub fn wtime(&self) -> f64 {
        self.handle.borrow().elapsed()
    }

    /// Terminate this process with `code`.
    ///
    /// Peers see the links close and fail any receive that depended on this
    /// process with `NoMatch`.
    pub fn abort(&self, code: i32) -> ! {
        error!("rank {} aborting with code {}", self.rank(), code);
        process::exit(code)
    }

    /// Close the transport. Outstanding requests are reported, and
    /// communicators still alive fail further sends with `Disconnected`.
    pub fn finalize(self) {
        info!("rank {} finalizing", self.rank());
        self.handle.borrow_mut().shutdown();
    }
}
