use std::thread;
use smpi::local::launch;
use smpi::{wait_all, wait_any, Error, Status};

#[test]
fn test_agrees_with_wait() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            world.send(&[42u64], 1, 3).unwrap();
            return;
        }
        let mut buf = [0u64];
        let mut req = world.irecv(&mut buf, 0, 3).unwrap();
        let polled = loop {
            match req.test().unwrap() {
                Some(status) => break status,
                None => thread::yield_now(),
            }
        };
        assert!(req.is_complete());
        assert_eq!(req.test().unwrap(), Some(polled));
        assert_eq!(req.wait().unwrap(), polled);
        assert_eq!(req.wait().unwrap(), polled);
        drop(req);
        assert_eq!(buf[0], 42);
        assert_eq!(polled, Status { source: 0, tag: 3, count: 1 });
    });
}

#[test]
fn cancel_after_completion_fails() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            world.send(&[1i32, 2, 3], 1, 0).unwrap();
            let mut req = world.isend(&[4i32], 1, 1).unwrap();
            assert!(matches!(req.cancel(), Err(Error::AlreadyCompleted)));
            assert_eq!(req.wait().unwrap().count, 1);
            world.barrier().unwrap();
            return;
        }
        let mut buf = [0i32; 3];
        let mut req = world.irecv(&mut buf, 0, 0).unwrap();
        let status = req.wait().unwrap();
        assert!(matches!(req.cancel(), Err(Error::AlreadyCompleted)));
        assert_eq!(req.wait().unwrap(), status);
        drop(req);
        assert_eq!(buf, [1, 2, 3]);

        // The message is already here when the receive is posted
        world.barrier().unwrap();
        let mut late = [0i32];
        let mut req = world.irecv(&mut late, 0, 1).unwrap();
        assert!(matches!(req.cancel(), Err(Error::AlreadyCompleted)));
        assert_eq!(req.wait().unwrap().count, 1);
        drop(req);
        assert_eq!(late[0], 4);
    });
}

#[test]
fn cancelled_receive_stays_cancelled() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 1 {
            let mut buf = [0u8; 2];
            let mut req = world.irecv(&mut buf, 0, 9).unwrap();
            assert_eq!(req.test().unwrap(), None);
            req.cancel().unwrap();
            req.cancel().unwrap();
            assert!(req.is_complete());
            assert!(matches!(req.wait(), Err(Error::Cancelled)));
            assert!(matches!(req.test(), Err(Error::Cancelled)));
        }
        // A later message with the same tag goes to the next receive
        world.barrier().unwrap();
        if world.rank() == 0 {
            world.send(&[7u8, 8], 1, 9).unwrap();
        } else {
            let mut buf = [0u8; 2];
            world.recv(&mut buf, 0, 9).unwrap();
            assert_eq!(buf, [7, 8]);
        }
    });
}

fn truncated<T>(result: &smpi::Result<T>, received: usize) -> bool {
    matches!(result, Err(Error::Truncated { capacity: 4, received: n }) if *n == received)
}

#[test]
fn failed_receive_keeps_its_error() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            world.send(&[1u32, 2, 3], 1, 0).unwrap();
            world.send(&[4u32, 5], 1, 1).unwrap();
            return;
        }
        let mut buf = [0u32];
        let mut req = world.irecv(&mut buf, 0, 0).unwrap();
        assert!(truncated(&req.wait(), 12));
        assert!(truncated(&req.wait(), 12));
        assert!(matches!(req.test(), Err(Error::Truncated { .. })));
        assert!(req.is_complete());
        assert!(matches!(req.cancel(), Err(Error::AlreadyCompleted)));
        drop(req);

        let mut other = [0u32];
        let mut reqs = [Some(world.irecv(&mut other, 0, 1).unwrap())];
        assert!(truncated(&wait_any(&mut reqs), 8));
        assert!(reqs[0].is_none());
        assert!(wait_any(&mut reqs).unwrap().is_none());
    });
}

#[test]
fn dropping_a_pending_receive_cancels_it() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 1 {
            let mut first = [0u16];
            let req = world.irecv(&mut first, 0, 0).unwrap();
            drop(req);
            world.barrier().unwrap();
            let mut second = [0u16];
            world.recv(&mut second, 0, 0).unwrap();
            assert_eq!(second[0], 11);
            assert_eq!(first[0], 0);
        } else {
            world.barrier().unwrap();
            world.send(&[11u16], 1, 0).unwrap();
        }
    });
}

#[test]
fn wait_any_reports_which_request_finished() {
    launch(3, |ctx| {
        let world = ctx.world();
        match world.rank() {
            0 => {
                let mut from_one = [0i32];
                let mut from_two = [0i32];
                let mut reqs = [
                    Some(world.irecv(&mut from_one, 1, 0).unwrap()),
                    Some(world.irecv(&mut from_two, 2, 0).unwrap()),
                ];
                let (index, status) = wait_any(&mut reqs).unwrap().unwrap();
                assert_eq!((index, status.source), (1, 2));
                assert!(reqs[1].is_none());
                world.send(&[0u8], 1, 5).unwrap();
                let (index, status) = wait_any(&mut reqs).unwrap().unwrap();
                assert_eq!((index, status.source), (0, 1));
                assert!(wait_any(&mut reqs).unwrap().is_none());
                drop(reqs);
                assert_eq!((from_one[0], from_two[0]), (10, 20));
            }
            1 => {
                let mut go = [0u8];
                world.recv(&mut go, 0, 5).unwrap();
                world.send(&[10i32], 0, 0).unwrap();
            }
            _ => world.send(&[20i32], 0, 0).unwrap(),
        }
    });
}

#[test]
fn wait_all_completes_every_request() {
    launch(4, |ctx| {
        let world = ctx.world();
        if world.rank() != 0 {
            let values = [world.rank(); 3];
            let mut req = world.isend(&values, 0, world.rank()).unwrap();
            req.wait().unwrap();
            return;
        }
        let mut bufs = vec![[0i32; 3]; 3];
        {
            let mut reqs: Vec<_> = bufs
                .iter_mut()
                .zip(1..)
                .map(|(buf, source)| world.irecv(buf, source, source).unwrap())
                .collect();
            let statuses = wait_all(&mut reqs).unwrap();
            let sources: Vec<i32> = statuses.iter().map(|s| s.source).collect();
            assert_eq!(sources, vec![1, 2, 3]);
        }
        assert_eq!(bufs, vec![[1; 3], [2; 3], [3; 3]]);
    });
}

#[test]
fn receive_posted_before_send_matches_in_order() {
    launch(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 1 {
            let mut a = [0u32];
            let mut b = [0u32];
            let mut first = world.irecv(&mut a, 0, 0).unwrap();
            let mut second = world.irecv(&mut b, 0, 0).unwrap();
            world.barrier().unwrap();
            second.wait().unwrap();
            first.wait().unwrap();
            drop((first, second));
            assert_eq!((a[0], b[0]), (1, 2));
        } else {
            world.barrier().unwrap();
            world.send(&[1u32], 1, 0).unwrap();
            world.send(&[2u32], 1, 0).unwrap();
        }
    });
}

/// Rank 0 hands out numbers, rank 1 answers with their factorials.
#[test]
fn nonblocking_factorial_exchange() {
    let answers = launch(2, |ctx| {
        let world = ctx.world();
        let inputs = [0u64, 1, 5, 10, 20];
        if world.rank() == 0 {
            let mut results = Vec::new();
            for n in inputs {
                let value = [n];
                let mut send = world.isend(&value, 1, 0).unwrap();
                let mut answer = [0u64];
                let mut recv = world.irecv(&mut answer, 1, 1).unwrap();
                send.wait().unwrap();
                recv.wait().unwrap();
                drop(recv);
                results.push(answer[0]);
            }
            results
        } else {
            for _ in inputs {
                let mut n = [0u64];
                world.irecv(&mut n, 0, 0).unwrap().wait().unwrap();
                let fact: u64 = (1..=n[0]).product();
                world.isend(&[fact], 0, 1).unwrap().wait().unwrap();
            }
            Vec::new()
        }
    });
    assert_eq!(answers[0], vec![1, 1, 120, 3_628_800, 2_432_902_008_176_640_000]);
}
