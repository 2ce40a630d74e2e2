//! Shared driver for the demo programs.
//!
//! Each program runs either as one rank of a group started by `smpi-exec`,
//! or with `--local N` as a whole group of `N` threads in this process.
use clap::Args;
use smpi::{Context, Result};

#[derive(Args, Debug)]
pub struct Launch {
    /// Run the whole group in this process with this many ranks
    #[arg(long)]
    pub local: Option<usize>,
}

impl Launch {
    /// Run `f` on every rank this process is responsible for.
    pub fn run<F>(&self, f: F) -> Result<()>
    where
        F: Fn(Context) -> Result<()> + Sync,
    {
        match self.local {
            Some(size) => smpi::local::launch(size, f).into_iter().collect(),
            None => f(smpi::init()?),
        }
    }
}
