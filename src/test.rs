use crate::{lien, Beacon, Escrow, EscrowError, Tracked};
use std::{collections::BTreeSet, collections::HashSet, mem::drop, ptr, sync::Arc, thread};

struct Plain {
    value: i32,
    _anchor: Arc<()>,
}

struct Sentinel {
    beacon: Beacon,
    value: i32,
    _anchor: Arc<()>,
}

impl Tracked for Sentinel {
    fn beacon(&self) -> &Beacon {
        &self.beacon
    }
}

fn plain(value: i32, anchor: &Arc<()>) -> Plain {
    Plain {
        value,
        _anchor: Arc::clone(anchor),
    }
}

fn sentinel(value: i32, anchor: &Arc<()>) -> Sentinel {
    Sentinel {
        beacon: Beacon::new(),
        value,
        _anchor: Arc::clone(anchor),
    }
}

#[test]
fn t001() {
    let p = Escrow::new(5);
    let addr = p.as_ptr();

    let u = p.claim().unwrap().unwrap();
    assert!(*u == 5);
    assert!(&*u as *const i32 == addr.cast_const());
    assert!(p == u);
}

#[test]
fn t002() {
    let p1 = Escrow::new(1);
    let p2 = p1.clone();

    let u = p2.claim().unwrap().unwrap();
    assert!(p1.claim() == Err(EscrowError::AlreadyClaimed));
    assert!(p2.claim() == Err(EscrowError::AlreadyClaimed));
    assert!(*u == 1);
}

#[test]
fn t003() {
    let p = Escrow::new(2);
    let copies: Vec<_> = (0..9).map(|_| p.clone()).collect();
    assert!(p.strong_count() == 10);
    assert!(copies.iter().all(|c| !c.is_claimed()));

    let _u = copies[3].claim().unwrap().unwrap();
    assert!(p.is_claimed());
    assert!(copies.iter().all(|c| c.is_claimed()));

    let late = p.clone();
    assert!(late.is_claimed());
}

#[test]
fn t004() {
    let anchor = Arc::new(());
    let p = Escrow::new(plain(1, &anchor));
    let q = p.clone();
    assert!(Arc::strong_count(&anchor) == 2);

    drop(p);
    assert!(Arc::strong_count(&anchor) == 2);
    drop(q);
    assert!(Arc::strong_count(&anchor) == 1);
}

#[test]
fn t005() {
    let anchor = Arc::new(());
    let p = Escrow::new(plain(3, &anchor));

    let u = p.claim().unwrap().unwrap();
    drop(p);
    assert!(Arc::strong_count(&anchor) == 2);
    assert!(u.value == 3);

    drop(u);
    assert!(Arc::strong_count(&anchor) == 1);
}

#[test]
fn t006() {
    let anchor = Arc::new(());
    let p = Escrow::new_tracked(sentinel(7, &anchor));
    let copies: Vec<_> = (0..9).map(|_| p.clone()).collect();
    assert!(p.strong_count() == 10);

    let u = p.claim().unwrap().unwrap();
    assert!(u.value == 7);
    assert!(!p.is_expired());

    drop(u);
    assert!(Arc::strong_count(&anchor) == 1);
    assert!(p.is_expired());

    for c in &copies {
        assert!(c.is_expired());
        assert!(c.get() == Err(EscrowError::Expired));
        assert!(c.claim().err() == Some(EscrowError::Expired));
        assert!(c.as_ptr().is_null());
    }
}

#[test]
fn t007() {
    let u = Box::new(3);
    let p = Escrow::observe(lien(&u));

    assert!(p.is_claimed());
    assert!(!p.is_expired());
    assert!(p == u);
    assert!(p.claim() == Err(EscrowError::AlreadyClaimed));
    assert!(*u == 3);
}

#[test]
fn t008() {
    let p: Escrow<i32> = Escrow::null();
    let q: Escrow<i32> = Escrow::default();

    assert!(p == q);
    assert!(p.is_null());
    assert!(!p.is_claimed());
    assert!(!p.is_expired());
    assert!(p.strong_count() == 0);
    assert!(p.as_ptr().is_null());

    for _ in 0..100 {
        assert!(p.claim() == Ok(None));
        assert!(p.get() == Ok(ptr::null_mut()));
    }
}

#[test]
fn t009() {
    let anchor = Arc::new(());
    let u = Box::new(plain(9, &anchor));
    let addr = &*u as *const Plain;

    let p = Escrow::adopt(u);
    assert!(!p.is_claimed());
    assert!(p == addr);

    let u = p.claim().unwrap().unwrap();
    assert!(&*u as *const Plain == addr);

    drop(u);
    drop(p);
    assert!(Arc::strong_count(&anchor) == 1);
}

#[test]
fn t010() {
    let anchor = Arc::new(());
    let p = Escrow::new_tracked(sentinel(4, &anchor));
    let u = p.claim().unwrap().unwrap();
    assert!(p.is_claimed());

    let q = Escrow::adopt_tracked(u);
    assert!(p.strong_count() == 2);
    assert!(q.strong_count() == 2);
    assert!(!p.is_claimed());
    assert!(!p.is_expired());
    assert!(p == q);
    assert!(p.get().is_ok());

    drop(q);
    assert!(!p.is_expired());
    drop(p);
    assert!(Arc::strong_count(&anchor) == 1);
}

#[test]
fn t011() {
    let anchor = Arc::new(());
    let u;
    {
        let p = Escrow::new_tracked(sentinel(6, &anchor));
        u = p.claim().unwrap().unwrap();
    }
    assert!(Arc::strong_count(&anchor) == 2);

    let p = Escrow::adopt_tracked(u);
    assert!(!p.is_claimed());
    assert!(p.strong_count() == 1);

    let u = p.claim().unwrap().unwrap();
    drop(u);
    assert!(p.is_expired());
}

#[test]
fn t012() {
    let anchor = Arc::new(());
    let p = Escrow::new_tracked(sentinel(8, &anchor));
    let u = p.claim().unwrap().unwrap();

    let q = Escrow::observe_tracked(lien(&u));
    assert!(p.strong_count() == 2);
    assert!(q.is_claimed());
    assert!(p == q);

    drop(u);
    assert!(p.is_expired());
    assert!(q.is_expired());
    assert!(Arc::strong_count(&anchor) == 1);
}

#[test]
fn t013() {
    let p = Escrow::new(5);
    let u = p.claim().unwrap().unwrap();

    drop(u);
    assert!(!p.is_expired());
    assert!(p.get().is_ok());
}

#[test]
fn t014() {
    let a = Escrow::new(1);
    let b = Escrow::new(2);
    let pa = a.as_ptr().cast_const();
    let pb = b.as_ptr().cast_const();

    assert!(a == pa);
    assert!(b == pb);
    assert!((a < b) == ((pa as usize) < (pb as usize)));
    assert!((a > b) == ((pa as usize) > (pb as usize)));
    assert!((a < b) != (b < a));
    assert!((a < pb) == ((pa as usize) < (pb as usize)));
    assert!((a < b.as_ptr()) == ((pa as usize) < (pb as usize)));
    assert!(a <= a.clone());
    assert!(a >= a.clone());
}

#[test]
fn t015() {
    let a = Escrow::new(1);
    let b = Escrow::new(2);

    let mut set = BTreeSet::new();
    set.insert(a.clone());
    set.insert(a.clone());
    set.insert(b.clone());
    assert!(set.len() == 2);

    let mut set = HashSet::new();
    set.insert(a.clone());
    set.insert(a);
    set.insert(b);
    assert!(set.len() == 2);
}

#[test]
fn t016() {
    let anchor = Arc::new(());
    let p = Escrow::new_tracked(sentinel(2, &anchor));
    let q = p.clone();
    let addr = p.as_ptr().cast_const();

    drop(p.claim().unwrap());
    assert!(q.is_expired());
    assert!(p == q);
    assert!(p == addr);
    assert!(p.as_ptr().is_null());
}

#[test]
fn t017() {
    let p = Escrow::new(1);
    let mut joins = Vec::new();
    for _ in 0..8 {
        let c = p.clone();
        joins.push(thread::spawn(move || c.claim().is_ok()));
    }

    let wins = joins
        .into_iter()
        .map(|j| j.join().unwrap())
        .filter(|won| *won)
        .count();
    assert!(wins == 1);
    assert!(p.is_claimed());
}

#[test]
fn t018() {
    let anchor = Arc::new(());
    let p = Escrow::new_tracked(sentinel(3, &anchor));
    let u = p.claim().unwrap().unwrap();

    {
        let q = Escrow::observe_tracked(lien(&u));
        assert!(q.is_claimed());
        assert!(q == u);
    }

    let r = Escrow::adopt_tracked(u);
    assert!(!r.is_claimed());
    assert!(!p.is_claimed());
    assert!(!p.is_expired());

    drop(p);
    drop(r);
    assert!(Arc::strong_count(&anchor) == 1);
}
