use std::net::TcpListener;
use std::thread;
use std::time::Duration;
use smpi::{Context, ReduceOp};
use smpi_p2p_tcp::TcpP2P;

/// Run a group over loopback TCP, one thread per rank.
fn run_tcp<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(Context) -> R + Sync,
    R: Send,
{
    let listeners: Vec<TcpListener> = (0..size)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    let peers: Vec<String> = listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect();
    let (f, peers) = (&f, &peers);
    thread::scope(|s| {
        let ranks: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                s.spawn(move || {
                    let provider =
                        TcpP2P::with_listener(rank as i32, listener, peers, Duration::from_secs(10)).unwrap();
                    f(Context::new(Box::new(provider)))
                })
            })
            .collect();
        ranks.into_iter().map(|r| r.join().unwrap()).collect()
    })
}

#[test]
fn collectives_over_tcp() {
    let results = run_tcp(3, |ctx| {
        let world = ctx.world();
        let mut data = if world.rank() == 2 { [7u32, 8, 9] } else { [0; 3] };
        world.broadcast(2, &mut data).unwrap();
        assert_eq!(data, [7, 8, 9]);
        world.barrier().unwrap();
        let mut total = [0i64];
        world.allreduce(&[i64::from(world.rank()) + 1], &mut total, ReduceOp::Sum).unwrap();
        total[0]
    });
    assert_eq!(results, vec![6, 6, 6]);
}

#[test]
fn large_message_over_tcp() {
    run_tcp(2, |ctx| {
        let world = ctx.world();
        let data: Vec<u64> = (0..100_000).collect();
        if world.rank() == 0 {
            world.send(&data, 1, 3).unwrap();
        } else {
            let mut buf = vec![0u64; data.len()];
            let status = world.recv(&mut buf, 0, 3).unwrap();
            assert_eq!(status.count, data.len());
            assert_eq!(buf, data);
        }
    });
}
