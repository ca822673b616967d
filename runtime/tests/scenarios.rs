// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end evaluation scenarios, each checked under pool sizes 1 through
//! 4: the output must not depend on the worker count.

use filament_runtime::ops::{self, Builtins};
use filament_runtime::{
    ClosureTable, Config, Context, Engine, FnGen, FnId, FnInst, Lazy, ParamKind, Program,
    RunOutcome, Shape, SizeClass, Suspend, Value, VariantValue, cache,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const POOL_SIZES: [usize; 4] = [1, 2, 3, 4];

fn assert_for_all_pools(program: &Program, args: &[Lazy], expected: &str) {
    for workers in POOL_SIZES {
        let engine = Engine::with_config(Config {
            num_cpus: Some(workers),
            verbose: false,
        });
        let result = engine.run(program, args.to_vec());
        assert_eq!(result.to_string(), expected, "under {workers} workers");
    }
}

/// `λx. x`
struct IdentityInst {
    x: Lazy,
}

impl FnInst for IdentityInst {
    fn body(&mut self, _cx: &mut Context) -> Result<Lazy, Suspend> {
        Ok(self.x.clone())
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(1)
    }
}

#[test]
fn identity() {
    let table = ClosureTable::new();
    let entry = table.add(FnGen::new(Shape::Leaf, cache::lazy_unit(), |mut args, _env| {
        let x = args.pop().expect("unary arity");
        Box::new(IdentityInst { x })
    }));
    let program = Program {
        table,
        entry,
        params: vec![ParamKind::Int],
    };

    assert_for_all_pools(&program, &[cache::lazy_int(5)], "5");
}

/// `λ(w,x,y,z). (w+x)+(y+z)`, three plus-works wired through scratch slots.
struct FourWayPlusInst {
    args: Vec<Lazy>,
    plus: FnId,
    left: Option<Lazy>,
    right: Option<Lazy>,
    total: Option<Lazy>,
}

impl FnInst for FourWayPlusInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        if self.left.is_none() {
            let (work, left) = cx.call(self.plus, &[self.args[0].clone(), self.args[1].clone()]);
            cx.spawn(&work);
            self.left = Some(left);
        }
        if self.right.is_none() {
            let (work, right) = cx.call(self.plus, &[self.args[2].clone(), self.args[3].clone()]);
            cx.spawn(&work);
            self.right = Some(right);
        }
        if self.total.is_none() {
            let left = self.left.clone().expect("spawned above");
            let right = self.right.clone().expect("spawned above");
            let (work, total) = cx.call(self.plus, &[left, right]);
            cx.spawn(&work);
            self.total = Some(total);
        }
        Ok(self.total.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(10, 30)
    }
}

#[test]
fn four_way_plus() {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let plus = builtins.plus;
    let entry = table.add(FnGen::new(
        Shape::Leaf,
        cache::lazy_unit(),
        move |args, _env| {
            Box::new(FourWayPlusInst {
                args,
                plus,
                left: None,
                right: None,
                total: None,
            })
        },
    ));
    let program = Program {
        table,
        entry,
        params: vec![ParamKind::Int; 4],
    };

    let args = [
        cache::lazy_int(11),
        cache::lazy_int(5),
        cache::lazy_int(10),
        cache::lazy_int(22),
    ];
    assert_for_all_pools(&program, &args, "48");
}

/// `λ(x,y,z). ((if x >= 0 then y else z) + 1) - 2`
struct BranchingInst {
    x: Lazy,
    y: Lazy,
    z: Lazy,
    builtins: Builtins,
    test: Option<Lazy>,
    incremented: Option<Lazy>,
    total: Option<Lazy>,
}

impl FnInst for BranchingInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        if self.test.is_none() {
            let (work, test) = cx.call(self.builtins.ge, &[self.x.clone(), cache::lazy_int(0)]);
            cx.spawn(&work);
            self.test = Some(test);
        }
        let test = self.test.clone().expect("spawned above");
        cx.wait(&[&test])?;

        if self.incremented.is_none() {
            let picked = if test.as_bool() { &self.y } else { &self.z };
            let (work, incremented) =
                cx.call(self.builtins.plus, &[picked.clone(), cache::lazy_int(1)]);
            cx.spawn(&work);
            self.incremented = Some(incremented);
        }
        if self.total.is_none() {
            let incremented = self.incremented.clone().expect("spawned above");
            let (work, total) = cx.call(self.builtins.minus, &[incremented, cache::lazy_int(2)]);
            cx.spawn(&work);
            self.total = Some(total);
        }
        Ok(self.total.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(10, 40)
    }
}

fn branching_program() -> Program {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let entry = table.add(FnGen::new(
        Shape::Leaf,
        cache::lazy_unit(),
        move |mut args, _env| {
            let z = args.pop().expect("ternary arity");
            let y = args.pop().expect("ternary arity");
            let x = args.pop().expect("ternary arity");
            Box::new(BranchingInst {
                x,
                y,
                z,
                builtins,
                test: None,
                incremented: None,
                total: None,
            })
        },
    ));
    Program {
        table,
        entry,
        params: vec![ParamKind::Int; 3],
    }
}

#[test]
fn branching_positive() {
    let args = [cache::lazy_int(5), cache::lazy_int(10), cache::lazy_int(22)];
    assert_for_all_pools(&branching_program(), &args, "9");
}

#[test]
fn branching_negative() {
    let args = [cache::lazy_int(-5), cache::lazy_int(10), cache::lazy_int(22)];
    assert_for_all_pools(&branching_program(), &args, "21");
}

/// `fib` with the recursion knotted through the closure environment, the
/// way the front-end emits self-referential closures.
struct FibInst {
    n: Lazy,
    env: Lazy,
    plus: FnId,
    sum: Option<Lazy>,
}

impl FnInst for FibInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.n);
        cx.wait(&[&self.n])?;
        let n = self.n.as_int();
        if n < 0 {
            return Ok(cache::lazy_int(0));
        }
        if n <= 1 {
            return Ok(cache::lazy_int(1));
        }
        if self.sum.is_none() {
            let fib = self.env.field(0).as_fn();
            let (left_work, left) = cx.call(fib, &[cache::lazy_int(n - 1)]);
            let (right_work, right) = cx.call(fib, &[cache::lazy_int(n - 2)]);
            let (sum_work, sum) = cx.call(self.plus, &[left, right]);
            cx.spawn(&left_work);
            cx.spawn(&right_work);
            cx.spawn(&sum_work);
            self.sum = Some(sum);
        }
        Ok(self.sum.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(10, 40)
    }
}

fn fib_program() -> Program {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let plus = builtins.plus;

    let fib = table.reserve();
    let env = Lazy::tuple(vec![Lazy::constant(Value::Fn(fib))]);
    table.fill(
        fib,
        FnGen::new(Shape::Leaf, env, move |mut args, env| {
            let n = args.pop().expect("unary arity");
            Box::new(FibInst {
                n,
                env,
                plus,
                sum: None,
            })
        }),
    );

    Program {
        table,
        entry: fib,
        params: vec![ParamKind::Int],
    }
}

#[test]
fn fib() {
    assert_for_all_pools(&fib_program(), &[cache::lazy_int(5)], "8");
}

#[test]
fn fib_edge_cases() {
    assert_for_all_pools(&fib_program(), &[cache::lazy_int(-3)], "0");
    assert_for_all_pools(&fib_program(), &[cache::lazy_int(0)], "1");
    assert_for_all_pools(&fib_program(), &[cache::lazy_int(1)], "1");
    assert_for_all_pools(&fib_program(), &[cache::lazy_int(10)], "89");
}

/// `is_even`/`is_odd`, each closing over the other.
struct ParityInst {
    x: Lazy,
    env: Lazy,
    base: bool,
    rec: Option<Lazy>,
}

impl FnInst for ParityInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.wait(&[&self.x])?;
        let x = self.x.as_int();
        if x <= 0 {
            return Ok(cache::lazy_bool(self.base));
        }
        if self.rec.is_none() {
            let other = self.env.field(0).as_fn();
            let (work, rec) = cx.call(other, &[cache::lazy_int(x - 1)]);
            cx.spawn(&work);
            self.rec = Some(rec);
        }
        Ok(self.rec.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(8, 20)
    }
}

fn parity_programs() -> (Program, FnId, FnId) {
    let table = ClosureTable::new();
    let _builtins = ops::install(&table);

    let is_even = table.reserve();
    let is_odd = table.reserve();

    let even_env = Lazy::tuple(vec![Lazy::constant(Value::Fn(is_odd))]);
    table.fill(
        is_even,
        FnGen::new(Shape::Leaf, even_env, |mut args, env| {
            let x = args.pop().expect("unary arity");
            Box::new(ParityInst {
                x,
                env,
                base: true,
                rec: None,
            })
        }),
    );

    let odd_env = Lazy::tuple(vec![Lazy::constant(Value::Fn(is_even))]);
    table.fill(
        is_odd,
        FnGen::new(Shape::Leaf, odd_env, |mut args, env| {
            let x = args.pop().expect("unary arity");
            Box::new(ParityInst {
                x,
                env,
                base: false,
                rec: None,
            })
        }),
    );

    let program = Program {
        table,
        entry: is_even,
        params: vec![ParamKind::Int],
    };
    (program, is_even, is_odd)
}

#[test]
fn mutually_recursive_parity() {
    let (program, _, is_odd) = parity_programs();
    assert_for_all_pools(&program, &[cache::lazy_int(10)], "true");
    assert_for_all_pools(&program, &[cache::lazy_int(23)], "false");
    assert_for_all_pools(&program, &[cache::lazy_int(0)], "true");

    let odd_entry = Program {
        table: program.table.clone(),
        entry: is_odd,
        params: vec![ParamKind::Int],
    };
    assert_for_all_pools(&odd_entry, &[cache::lazy_int(5)], "true");
    assert_for_all_pools(&odd_entry, &[cache::lazy_int(10)], "false");
}

/// List sum over a cons/nil variant, the list built in code.
const NIL_TAG: u32 = 0;
const CONS_TAG: u32 = 1;

fn nil() -> Lazy {
    Lazy::constant(Value::Variant(VariantValue {
        tag: NIL_TAG,
        payload: cache::lazy_unit(),
    }))
}

fn cons(head: i64, tail: Lazy) -> Lazy {
    Lazy::constant(Value::Variant(VariantValue {
        tag: CONS_TAG,
        payload: Lazy::tuple(vec![cache::lazy_int(head), tail]),
    }))
}

struct SumInst {
    list: Lazy,
    env: Lazy,
    plus: FnId,
    total: Option<Lazy>,
}

impl FnInst for SumInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.list);
        cx.wait(&[&self.list])?;
        let variant = self.list.as_variant();
        if variant.tag == NIL_TAG {
            return Ok(cache::lazy_int(0));
        }
        if self.total.is_none() {
            let head = variant.payload.field(0);
            let tail = variant.payload.field(1);
            let sum = self.env.field(0).as_fn();
            let (rec_work, rec) = cx.call(sum, &[tail]);
            let (plus_work, total) = cx.call(self.plus, &[head, rec]);
            cx.spawn(&rec_work);
            cx.spawn(&plus_work);
            self.total = Some(total);
        }
        Ok(self.total.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(10, 30)
    }
}

#[test]
fn variant_list_sum() {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let plus = builtins.plus;

    let sum = table.reserve();
    let env = Lazy::tuple(vec![Lazy::constant(Value::Fn(sum))]);
    table.fill(
        sum,
        FnGen::new(Shape::Leaf, env, move |mut args, env| {
            let list = args.pop().expect("unary arity");
            Box::new(SumInst {
                list,
                env,
                plus,
                total: None,
            })
        }),
    );

    let list = cons(-9, cons(4, cons(8, nil())));
    for workers in POOL_SIZES {
        let engine = Engine::with_config(Config {
            num_cpus: Some(workers),
            verbose: false,
        });
        let program = Program {
            table: table.clone(),
            entry: sum,
            params: vec![ParamKind::Int],
        };
        let result = engine.run(&program, vec![list.clone()]);
        assert_eq!(result.to_string(), "3", "under {workers} workers");
    }
}

/// A tuple-returning entry: the root work fulfills one placeholder per
/// result leaf.
struct PairInst {
    x: Lazy,
    y: Lazy,
}

impl FnInst for PairInst {
    fn body(&mut self, _cx: &mut Context) -> Result<Lazy, Suspend> {
        Ok(Lazy::tuple(vec![self.x.clone(), self.y.clone()]))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(10)
    }
}

#[test]
fn tuple_result() {
    let table = ClosureTable::new();
    let entry = table.add(FnGen::new(Shape::pair(), cache::lazy_unit(), |mut args, _env| {
        let y = args.pop().expect("binary arity");
        let x = args.pop().expect("binary arity");
        Box::new(PairInst { x, y })
    }));
    let program = Program {
        table,
        entry,
        params: vec![ParamKind::Int; 2],
    };

    let args = [cache::lazy_int(4), cache::lazy_int(-4)];
    assert_for_all_pools(&program, &args, "(4, -4)");
}

/// A higher-order entry: awaits its function argument, then calls it.
struct ApplyInst {
    f: Lazy,
    x: Lazy,
    result: Option<Lazy>,
}

impl FnInst for ApplyInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.f);
        cx.wait(&[&self.f])?;
        if self.result.is_none() {
            let (work, result) = cx.call(self.f.as_fn(), &[self.x.clone()]);
            cx.spawn(&work);
            self.result = Some(result);
        }
        Ok(self.result.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(8, 20)
    }
}

#[test]
fn higher_order_call() {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let entry = table.add(FnGen::new(Shape::Leaf, cache::lazy_unit(), |mut args, _env| {
        let x = args.pop().expect("binary arity");
        let f = args.pop().expect("binary arity");
        Box::new(ApplyInst { f, x, result: None })
    }));
    let program = Program {
        table,
        entry,
        params: vec![ParamKind::Int; 2],
    };

    let args = [
        Lazy::constant(Value::Fn(builtins.decrement)),
        cache::lazy_int(3),
    ];
    assert_for_all_pools(&program, &args, "2");
}

/// A body that suspends by fiat keeps its scratch state across runs and
/// never re-spawns its child.
struct DelayedIncrementInst {
    x: Lazy,
    increment: FnId,
    finish: Arc<AtomicBool>,
    result: Option<Lazy>,
}

impl FnInst for DelayedIncrementInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        if self.result.is_none() {
            let (work, result) = cx.call(self.increment, &[self.x.clone()]);
            cx.spawn(&work);
            self.result = Some(result);
        }
        if self.finish.load(Ordering::Acquire) {
            Ok(self.result.clone().expect("spawned above"))
        } else {
            Err(Suspend)
        }
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(8)
    }
}

#[test]
fn suspension_persists_scratch_state() {
    let table = ClosureTable::new();
    let builtins = ops::install(&table);
    let increment = builtins.increment;
    let finish = Arc::new(AtomicBool::new(false));

    let delayed = {
        let finish = Arc::clone(&finish);
        table.add(FnGen::new(Shape::Leaf, cache::lazy_unit(), move |mut args, _env| {
            let x = args.pop().expect("unary arity");
            Box::new(DelayedIncrementInst {
                x,
                increment,
                finish: Arc::clone(&finish),
                result: None,
            })
        }))
    };

    let mut cx = Context::detached(table);
    let (work, result) = cx.call(delayed, &[cache::lazy_int(7)]);

    assert!(work.status().acquire());
    assert_eq!(work.run(&mut cx), RunOutcome::Suspended);
    assert!(!result.done());
    assert!(!work.done());

    let spawned = cx.take_spawned();
    assert_eq!(spawned.len(), 1, "the child is spawned exactly once");

    finish.store(true, Ordering::Release);
    // the stack inversion released ownership, so the work can be re-taken
    assert!(work.status().acquire());
    assert_eq!(work.run(&mut cx), RunOutcome::Finished);
    assert!(work.done());
    // the result now chains to the still-pending child
    assert!(!result.done());

    cx.drive(&spawned[0]);
    assert!(result.done());
    assert_eq!(result.as_int(), 8);
}

/// Self-recursion through the environment: counts down to zero.
struct CountdownInst {
    x: Lazy,
    env: Lazy,
    rec: Option<Lazy>,
}

impl FnInst for CountdownInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.wait(&[&self.x])?;
        let x = self.x.as_int();
        if x <= 0 {
            return Ok(self.x.clone());
        }
        if self.rec.is_none() {
            let me = self.env.field(0).as_fn();
            let (work, rec) = cx.call(me, &[cache::lazy_int(x - 1)]);
            cx.spawn(&work);
            self.rec = Some(rec);
        }
        Ok(self.rec.clone().expect("spawned above"))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::range(8, 16)
    }
}

#[test]
fn self_recursive_countdown() {
    let table = ClosureTable::new();
    let countdown = table.reserve();
    let env = Lazy::tuple(vec![Lazy::constant(Value::Fn(countdown))]);
    table.fill(
        countdown,
        FnGen::new(Shape::Leaf, env, |mut args, env| {
            let x = args.pop().expect("unary arity");
            Box::new(CountdownInst { x, env, rec: None })
        }),
    );
    let program = Program {
        table,
        entry: countdown,
        params: vec![ParamKind::Int],
    };

    assert_for_all_pools(&program, &[cache::lazy_int(5)], "0");
}
