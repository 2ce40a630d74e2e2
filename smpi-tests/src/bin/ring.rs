//! Pass a counter around the ring of ranks.
use clap::Parser;
use smpi_tests::Launch;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    launch: Launch,
}

fn main() -> smpi::Result<()> {
    let args = Args::parse();
    args.launch.run(|ctx| {
        let comm = ctx.world();
        let size = comm.size() as i32;
        let id = comm.rank();
        let next = (id + 1) % size;
        let prev = (id + size - 1) % size;

        let mut x = [0i32];
        if id == 0 {
            // Initiate the first send
            comm.send(&x, next, 0)?;
            comm.recv(&mut x, prev, 0)?;
            println!("(id: {}) counter came back as {}", id, x[0]);
        } else {
            comm.recv(&mut x, prev, 0)?;
            x[0] += 1;
            println!("(id: {}) incremented x to {}", id, x[0]);
            comm.send(&x, next, 0)?;
        }
        Ok(())
    })
}
