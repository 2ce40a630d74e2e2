//! Dot product of two vectors: scatter the halves, reduce the partial sums,
//! broadcast the result and gather every rank's part for a report.
use clap::Parser;
use smpi::ReduceOp;
use smpi_tests::Launch;

#[derive(Parser)]
struct Args {
    /// Elements per rank
    #[arg(long, default_value_t = 4)]
    per_rank: usize,

    #[command(flatten)]
    launch: Launch,
}

fn main() -> smpi::Result<()> {
    let args = Args::parse();
    let per_rank = args.per_rank;
    args.launch.run(|ctx| {
        let world = ctx.world();
        let total = per_rank * world.size();
        let (x, y): (Vec<f64>, Vec<f64>) = if world.rank() == 0 {
            (
                (0..total).map(|i| i as f64).collect(),
                (0..total).map(|i| (total - i) as f64).collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        world.barrier()?;
        let start = ctx.wtime();
        let mut xs = vec![0.0; per_rank];
        let mut ys = vec![0.0; per_rank];
        world.scatter(0, &x, &mut xs)?;
        world.scatter(0, &y, &mut ys)?;
        let partial: f64 = xs.iter().zip(&ys).map(|(a, b)| a * b).sum();

        let mut dot = [partial];
        world.reduce(0, &[partial], &mut dot, ReduceOp::Sum)?;
        world.broadcast(0, &mut dot)?;

        let mut partials = vec![0.0; if world.rank() == 0 { world.size() } else { 0 }];
        world.gather(0, &[partial], &mut partials)?;
        if world.rank() == 0 {
            println!("partial sums: {partials:?}");
            println!("x . y = {} ({:.6}s)", dot[0], ctx.wtime() - start);
        }
        Ok(())
    })
}
