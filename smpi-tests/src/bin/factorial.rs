//! Rank 0 sends numbers to rank 1 without blocking and polls for the
//! factorials coming back.
use std::thread;
use clap::Parser;
use smpi_tests::Launch;

#[derive(Parser)]
struct Args {
    /// Numbers to compute the factorial of
    #[arg(default_values_t = [5u64, 10, 15, 20])]
    numbers: Vec<u64>,

    #[command(flatten)]
    launch: Launch,
}

fn main() -> smpi::Result<()> {
    let args = Args::parse();
    let numbers = &args.numbers;
    args.launch.run(|ctx| {
        let world = ctx.world_with_size(2)?;
        if world.rank() == 0 {
            for &n in numbers {
                let value = [n];
                let mut send = world.isend(&value, 1, 0)?;
                let mut answer = [0u64];
                let mut recv = world.irecv(&mut answer, 1, 1)?;
                send.wait()?;
                let mut polls = 0;
                while recv.test()?.is_none() {
                    polls += 1;
                    thread::yield_now();
                }
                drop(recv);
                println!("{}! = {} (after {} polls)", n, answer[0], polls);
            }
        } else {
            for _ in numbers {
                let mut n = [0u64];
                world.irecv(&mut n, 0, 0)?.wait()?;
                let fact = (1..=n[0]).fold(1u64, u64::wrapping_mul);
                world.isend(&[fact], 0, 1)?.wait()?;
            }
        }
        Ok(())
    })
}
