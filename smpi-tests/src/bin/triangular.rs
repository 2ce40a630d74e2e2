//! Send the upper triangle of an N×N matrix to rank 1 and the lower one to
//! rank 2, each as a single message.
use clap::Parser;
use smpi::Datatype;
use smpi_tests::Launch;

#[derive(Parser)]
struct Args {
    /// Matrix order
    #[arg(short, default_value_t = 4)]
    n: usize,

    #[command(flatten)]
    launch: Launch,
}

fn print_matrix(label: &str, matrix: &[f64], n: usize) {
    println!("{label}:");
    for row in matrix.chunks(n) {
        let row: Vec<String> = row.iter().map(|v| format!("{v:6.1}")).collect();
        println!("{}", row.join(" "));
    }
}

fn main() -> smpi::Result<()> {
    let args = Args::parse();
    let n = args.n;
    args.launch.run(|ctx| {
        let world = ctx.world_with_size(3)?;
        let upper = Datatype::upper_triangular(n, 8)?.commit()?;
        let lower = Datatype::lower_triangular(n, 8)?.commit()?;
        let mut matrix = vec![0.0f64; n * n];
        match world.rank() {
            0 => {
                for (i, v) in matrix.iter_mut().enumerate() {
                    *v = (i + 1) as f64;
                }
                print_matrix("original", &matrix, n);
                world.send_with(&matrix, &upper, 1, 0)?;
                world.send_with(&matrix, &lower, 2, 0)?;
            }
            1 => {
                world.recv_with(&mut matrix, &upper, 0, 0)?;
                print_matrix("upper triangle", &matrix, n);
            }
            _ => {
                world.recv_with(&mut matrix, &lower, 0, 0)?;
                print_matrix("lower triangle", &matrix, n);
            }
        }
        Ok(())
    })
}
