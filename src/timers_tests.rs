//! Tests for the timeout manager.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::Token;

use crate::event_loop::EventLoop;
use crate::timers::{Periodic, TimeoutManager};

fn new_loop() -> EventLoop {
    EventLoop::new().expect("failed to create event loop")
}

#[test]
fn execute_fires_in_deadline_order() {
    let mut ev = new_loop();
    let mut timeouts = TimeoutManager::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let now = Instant::now();

    for (n, offset) in [(2usize, 20u64), (0, 5), (1, 10)] {
        let fired = Rc::clone(&fired);
        let _ = timeouts.add_timeout(
            now + Duration::from_millis(offset),
            Box::new(move |_| fired.borrow_mut().push(n)),
        );
    }

    let next = timeouts.execute(now + Duration::from_millis(50), &mut ev);
    assert_eq!(*fired.borrow(), &[0, 1, 2]);
    assert_eq!(next, None);
    assert!(timeouts.is_empty());
}

#[test]
fn execute_never_fires_future_deadlines() {
    let mut ev = new_loop();
    let mut timeouts = TimeoutManager::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let now = Instant::now();

    for (n, offset) in [(0usize, 10u64), (1, 20), (2, 30)] {
        let fired = Rc::clone(&fired);
        let _ = timeouts.add_timeout(
            now + Duration::from_millis(offset),
            Box::new(move |_| fired.borrow_mut().push(n)),
        );
    }

    let next = timeouts.execute(now + Duration::from_millis(20), &mut ev);
    assert_eq!(*fired.borrow(), &[0, 1]);
    // The next wake must be exactly the remaining deadline minus now.
    assert_eq!(next, Some(Duration::from_millis(10)));
    assert_eq!(timeouts.len(), 1);
}

#[test]
fn timeouts_added_while_firing_are_not_visited() {
    let mut ev = new_loop();
    let mut timeouts = TimeoutManager::new();
    let fired = Rc::new(RefCell::new(0));
    let now = Instant::now();

    let fired2 = Rc::clone(&fired);
    let _ = timeouts.add_timeout(
        now,
        Box::new(move |ev| {
            *fired2.borrow_mut() += 1;
            // Schedule another, already expired, timeout from within the
            // firing callback. It must only run on a later `execute` call.
            let fired3 = Rc::clone(&fired2);
            let _ = ev.add_timeout(now, move |_| *fired3.borrow_mut() += 1);
        }),
    );

    let _ = timeouts.execute(now, &mut ev);
    // Only the outer callback fired in this call.
    assert_eq!(*fired.borrow(), 1);

    // The inner timeout went to the event loop's own manager and fires on a
    // later execution.
    let callbacks = ev.timeouts_mut().take_expired(now);
    assert_eq!(callbacks.len(), 1);
    for callback in callbacks {
        callback(&mut ev);
    }
    assert_eq!(*fired.borrow(), 2);
}

#[test]
fn cancel_skips_the_callback() {
    let mut ev = new_loop();
    let mut timeouts = TimeoutManager::new();
    let fired = Rc::new(RefCell::new(false));
    let now = Instant::now();

    let fired2 = Rc::clone(&fired);
    let key = timeouts.add_timeout(now, Box::new(move |_| *fired2.borrow_mut() = true));
    timeouts.cancel(key);

    let next = timeouts.execute(now + Duration::from_secs(1), &mut ev);
    assert!(!*fired.borrow());
    assert_eq!(next, None);
}

#[test]
fn keep_alive_is_replaced_on_re_add() {
    let mut ev = new_loop();
    let mut timeouts = TimeoutManager::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let now = Instant::now();
    let token = Token(1);

    for n in 0..2usize {
        let fired = Rc::clone(&fired);
        timeouts.add_keep_alive(
            token,
            now + Duration::from_millis(10),
            Box::new(move |_| fired.borrow_mut().push(n)),
        );
    }
    assert_eq!(timeouts.len(), 1);

    let _ = timeouts.execute(now + Duration::from_secs(1), &mut ev);
    // Only the most recently added callback fired.
    assert_eq!(*fired.borrow(), &[1]);
    assert!(!timeouts.has_keep_alive(token));
}

#[test]
fn touch_strictly_increases_the_deadline() {
    let mut timeouts = TimeoutManager::with_keep_alive_window(Duration::from_secs(10));
    let now = Instant::now();
    let token = Token(1);

    timeouts.add_keep_alive(token, now + Duration::from_secs(10), Box::new(|_| {}));
    let before = timeouts.next_delay(now).unwrap();

    timeouts.touch(token, now + Duration::from_secs(5));
    let after = timeouts.next_delay(now).unwrap();
    assert!(after > before);
    assert_eq!(after, Duration::from_secs(15));
    assert!(timeouts.has_keep_alive(token));
}

#[test]
fn remove_keep_alive_drops_the_entry() {
    let mut timeouts = TimeoutManager::new();
    let token = Token(1);
    timeouts.add_keep_alive(token, Instant::now(), Box::new(|_| {}));
    timeouts.remove_keep_alive(token);
    assert!(!timeouts.has_keep_alive(token));
    assert!(timeouts.is_empty());
}

#[test]
fn periodic_reschedules_until_cancelled() {
    let mut ev = new_loop();
    let count = Rc::new(RefCell::new(0));

    let count2 = Rc::clone(&count);
    let periodic = Periodic::new(Duration::from_millis(1), move |_| {
        *count2.borrow_mut() += 1;
    });
    periodic.start(&mut ev);
    assert!(periodic.is_active());

    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(2));
        ev.run_once().unwrap();
    }
    let fired = *count.borrow();
    assert!(fired >= 2, "periodic fired {fired} times");

    periodic.cancel();
    assert!(!periodic.is_active());
    let before = *count.borrow();
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(2));
        ev.run_once().unwrap();
    }
    // At most the fire already in flight when cancelling.
    assert!(*count.borrow() <= before + 1);
}
