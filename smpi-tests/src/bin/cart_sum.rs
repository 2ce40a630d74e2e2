//! Element-wise sum of two ROWS×COLS matrices on a cartesian grid, one
//! element per rank.
use clap::Parser;
use smpi::ReduceOp;
use smpi_tests::Launch;

#[derive(Parser)]
struct Args {
    /// Grid rows
    #[arg(long, default_value_t = 2)]
    rows: usize,

    /// Grid columns
    #[arg(long, default_value_t = 2)]
    cols: usize,

    #[command(flatten)]
    launch: Launch,
}

fn main() -> smpi::Result<()> {
    let args = Args::parse();
    let (rows, cols) = (args.rows, args.cols);
    args.launch.run(|ctx| {
        let world = ctx.world_with_size(rows * cols)?;
        let (grid, topo) = world.make_cartesian(&[rows, cols], &[false, false], true)?;
        let (mut a, mut b) = ([0i32], [0i32]);
        if grid.rank() == 0 {
            let matrix_a: Vec<i32> = (0..rows * cols).map(|i| (i % 10) as i32 + 1).collect();
            let matrix_b: Vec<i32> = (0..rows * cols).map(|i| (i * 7 % 10) as i32 + 1).collect();
            let start = ctx.wtime();
            for dest in 1..grid.size() as i32 {
                let at = topo.coords_of(dest)?;
                let index = at[0] * cols + at[1];
                grid.send(&matrix_a[index..index + 1], dest, 0)?;
                grid.send(&matrix_b[index..index + 1], dest, 1)?;
            }
            a[0] = matrix_a[0];
            b[0] = matrix_b[0];
            log::info!("distributed elements in {:.6}s", ctx.wtime() - start);
        } else {
            grid.recv(&mut a, 0, 0)?;
            grid.recv(&mut b, 0, 1)?;
        }
        let coords = grid.coords()?;
        let c = [a[0] + b[0]];
        println!("rank {} at {:?}: {} + {} = {}", grid.rank(), coords, a[0], b[0], c[0]);

        let mut matrix_c = vec![0i32; if grid.rank() == 0 { rows * cols } else { 0 }];
        grid.gather(0, &c, &mut matrix_c)?;
        if let Some(total) = grid.reduce_value(0, c[0], ReduceOp::Sum)? {
            for row in matrix_c.chunks(cols) {
                println!("{row:?}");
            }
            println!("sum of C: {total}");
        }
        Ok(())
    })
}
