//! Dispatch protocol: entry, handler-to-handler transfer, returns and limits.

use std::sync::{Arc, Mutex};
use std::thread;
use strand_vm::assembler::Assembler;
use strand_vm::config::VmConfig;
use strand_vm::object::{ClassTable, ObjectModel};
use strand_vm::opcode::Opcode;
use strand_vm::values::Value;
use strand_vm::vm::{link, DebugEvent, FrameState, LinkedMethod, VmError, VM};

fn linked(asm: Assembler) -> Arc<LinkedMethod> {
    let method = asm.finish().expect("method should assemble");
    Arc::new(link(&method).expect("method should link"))
}

fn machine() -> VM {
    VM::new(Arc::new(ClassTable::with_builtins()))
}

/// Helper: attach a callback collecting every debug event.
fn record(vm: &mut VM) -> Arc<Mutex<Vec<DebugEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    vm.set_debug_callback(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

fn steps(events: &[DebugEvent]) -> Vec<(usize, Opcode)> {
    events
        .iter()
        .filter_map(|e| match e {
            DebugEvent::Step { ip, opcode, .. } => Some((*ip, *opcode)),
            _ => None,
        })
        .collect()
}

fn transitions(events: &[DebugEvent]) -> Vec<(FrameState, FrameState)> {
    events
        .iter()
        .filter_map(|e| match e {
            DebugEvent::Transition { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn not_equal_method() -> Arc<LinkedMethod> {
    let mut asm = Assembler::new("differ?").arity(2);
    asm.emit(Opcode::NotEqual, &[0, 1]).op(Opcode::Return);
    linked(asm)
}

// ─── Comparison of two registers ───

#[test]
fn not_equal_on_equal_operands_is_false() {
    let method = not_equal_method();
    let mut vm = machine();
    let result = vm.run(&method, Value::Nil, vec![Value::Int(1), Value::Int(1)]).unwrap();
    assert_eq!(result, Value::Bool(false));
}

#[test]
fn not_equal_on_unequal_operands_is_true() {
    let method = not_equal_method();
    let mut vm = machine();
    let result = vm.run(&method, Value::Nil, vec![Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn not_equal_on_other_immediates() {
    let method = not_equal_method();
    let mut vm = machine();
    let cases = [
        (Value::Nil, Value::Nil, false),
        (Value::symbol("a"), Value::symbol("b"), true),
        (Value::Bool(true), Value::Bool(true), false),
        (Value::Int(1), Value::Float(1.0), false),
        (Value::Nil, Value::Bool(false), true),
    ];
    for (lhs, rhs, expected) in cases {
        let result = vm.run(&method, Value::Nil, vec![lhs, rhs]).unwrap();
        assert_eq!(result, Value::Bool(expected));
    }
}

// ─── Instruction pointer discipline ───

#[test]
fn non_branching_opcodes_advance_by_their_width() {
    let mut asm = Assembler::new("shuffle").registers(1);
    asm.push_int(1)
        .op(Opcode::Dup)
        .push_int(2)
        .op(Opcode::Swap)
        .op(Opcode::Pop)
        .set_local(0)
        .op(Opcode::Noop)
        .emit(Opcode::MakeArray, &[2])
        .push_local(0)
        .op(Opcode::Pop)
        .op(Opcode::Return);
    let method = linked(asm);

    let mut vm = machine();
    let events = record(&mut vm);
    let result = vm.run(&method, Value::Nil, vec![]).unwrap();
    assert_eq!(result, Value::array(vec![Value::Int(1), Value::Int(2)]));

    let steps = steps(&events.lock().unwrap());
    assert_eq!(steps.first(), Some(&(0, Opcode::PushInt)));
    assert_eq!(steps.last().map(|s| s.1), Some(Opcode::Return));
    for pair in steps.windows(2) {
        let (ip, opcode) = pair[0];
        assert_eq!(pair[1].0, ip + opcode.width(), "after {} at {}", opcode, ip);
    }
}

#[test]
fn single_return_enters_returns_and_exits() {
    let mut asm = Assembler::new("empty");
    asm.op(Opcode::Return);
    let method = linked(asm);

    let mut vm = machine();
    let events = record(&mut vm);
    assert_eq!(vm.run(&method, Value::Nil, vec![]).unwrap(), Value::Nil);

    let events = events.lock().unwrap();
    assert_eq!(steps(&events), vec![(0, Opcode::Return)]);
    assert_eq!(
        transitions(&events),
        vec![
            (FrameState::Entered, FrameState::Returning),
            (FrameState::Returning, FrameState::Exited),
        ]
    );
    assert!(matches!(events.first(), Some(DebugEvent::Enter { depth: 0, .. })));
    assert!(matches!(events.last(), Some(DebugEvent::Exit { returned: true, .. })));
}

#[test]
fn every_run_ends_returning_or_unwinding() {
    let mut returns = Assembler::new("returns");
    returns.push_int(7).op(Opcode::Return);

    let mut raises = Assembler::new("raises");
    raises.push_literal(strand_vm::method::Literal::Str("boom".into())).op(Opcode::Raise);

    let mut loops = Assembler::new("loops").registers(1);
    let top = loops.label();
    let done = loops.label();
    loops.push_int(3).set_local(0).op(Opcode::Pop);
    loops.bind(top);
    loops.push_local(0).jump(Opcode::GotoIfFalse, done);
    loops.push_local(0).push_int(1).op(Opcode::Sub).set_local(0).op(Opcode::Pop);
    loops.push_local(0).push_int(0).op(Opcode::Greater).op(Opcode::Not).jump(Opcode::GotoIfTrue, done);
    loops.jump(Opcode::Goto, top);
    loops.bind(done);
    loops.push_local(0).op(Opcode::Return);

    for asm in [returns, raises, loops] {
        let method = linked(asm);
        let mut vm = machine();
        let events = record(&mut vm);
        let _ = vm.run(&method, Value::Nil, vec![]);
        let transitions = transitions(&events.lock().unwrap());
        let (last_from, last_to) = *transitions.last().unwrap();
        assert_eq!(last_to, FrameState::Exited);
        assert!(
            matches!(last_from, FrameState::Returning | FrameState::Unwinding),
            "{} exited from {:?}",
            method.name,
            last_from
        );
    }
}

// ─── Branches ───

#[test]
fn countdown_loop_sums() {
    let mut asm = Assembler::new("sum_to").arity(1).registers(2);
    let top = asm.label();
    let done = asm.label();
    asm.push_int(0).set_local(1).op(Opcode::Pop);
    asm.bind(top);
    asm.push_local(0).push_int(0).op(Opcode::Greater).jump(Opcode::GotoIfFalse, done);
    asm.push_local(1).push_local(0).op(Opcode::Add).set_local(1).op(Opcode::Pop);
    asm.push_local(0).push_int(1).op(Opcode::Sub).set_local(0).op(Opcode::Pop);
    asm.jump(Opcode::Goto, top);
    asm.bind(done);
    asm.push_local(1).op(Opcode::Return);
    let method = linked(asm);

    let mut vm = machine();
    assert_eq!(vm.run(&method, Value::Nil, vec![Value::Int(5)]).unwrap(), Value::Int(15));
    assert_eq!(vm.run(&method, Value::Nil, vec![Value::Int(0)]).unwrap(), Value::Int(0));
    assert_eq!(vm.run(&method, Value::Nil, vec![Value::Int(100)]).unwrap(), Value::Int(5050));
}

// ─── Nested sends ───

#[test]
fn nested_send_enters_a_deeper_frame() {
    let mut double = Assembler::new("double");
    double.op(Opcode::PushSelf).op(Opcode::PushSelf).op(Opcode::Add).op(Opcode::Return);
    let mut table = ClassTable::with_builtins();
    table.define_compiled("Integer", "double", linked(double));

    let mut main = Assembler::new("main");
    main.push_int(21).send("double", 0).op(Opcode::Return);
    let main = linked(main);

    let mut vm = VM::new(Arc::new(table));
    let events = record(&mut vm);
    assert_eq!(vm.run(&main, Value::Nil, vec![]).unwrap(), Value::Int(42));
    assert_eq!(vm.call_depth(), 0);

    let depths: Vec<(String, usize)> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            DebugEvent::Enter { method, depth } => Some((method.to_string(), *depth)),
            _ => None,
        })
        .collect();
    assert_eq!(depths, vec![("main".to_string(), 0), ("double".to_string(), 1)]);
}

#[test]
fn send_with_arguments_and_ivars() {
    let mut scale = Assembler::new("scale").arity(1);
    scale.push_ivar("x").push_local(0).op(Opcode::Mul);
    scale.push_ivar("y").push_local(0).op(Opcode::Mul);
    scale.push_ivar("z").emit(Opcode::MakeArray, &[3]).op(Opcode::Return);
    let mut table = ClassTable::with_builtins();
    table.define_compiled("Point", "scale", linked(scale));

    let mut main = Assembler::new("main");
    main.op(Opcode::PushSelf).push_int(3).send("scale", 1).op(Opcode::Return);
    let main = linked(main);

    let point = Value::object("Point", [("x", Value::Int(1)), ("y", Value::Int(2))]);
    let mut vm = VM::new(Arc::new(table));
    let result = vm.run(&main, point, vec![]).unwrap();
    assert_eq!(result, Value::array(vec![Value::Int(3), Value::Int(6), Value::Nil]));
}

#[test]
fn native_methods_answer_sends() {
    let mut main = Assembler::new("main");
    main.push_literal(strand_vm::method::Literal::Str("strand".into()))
        .send("upcase", 0)
        .send("length", 0)
        .op(Opcode::Return);
    let main = linked(main);
    let mut vm = machine();
    assert_eq!(vm.run(&main, Value::Nil, vec![]).unwrap(), Value::Int(6));
}

// ─── Limits ───

#[test]
fn runaway_recursion_is_a_stack_overflow() {
    let mut down = Assembler::new("down");
    down.op(Opcode::PushSelf).send("down", 0).op(Opcode::Return);
    let mut table = ClassTable::with_builtins();
    table.define_compiled("Integer", "down", linked(down));

    let mut main = Assembler::new("main");
    main.push_int(1).send("down", 0).op(Opcode::Return);
    let main = linked(main);

    let config = VmConfig {
        max_call_depth: 8,
        ..VmConfig::default()
    };
    let mut vm = VM::with_config(config, Arc::new(table));
    let err = vm.run(&main, Value::Nil, vec![]).unwrap_err();
    assert!(matches!(err, VmError::StackOverflow(8)), "got {err}");
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn deep_configured_depth_stops_at_the_native_stack() {
    let mut down = Assembler::new("down");
    down.op(Opcode::PushSelf).send("down", 0).op(Opcode::Return);
    let mut table = ClassTable::with_builtins();
    table.define_compiled("Integer", "down", linked(down));
    let objects: Arc<dyn ObjectModel> = Arc::new(table);

    let mut main = Assembler::new("main");
    main.push_int(1).send("down", 0).op(Opcode::Return);
    let main = linked(main);

    let worker = thread::Builder::new()
        .stack_size(512 * 1024)
        .spawn(move || {
            let config = VmConfig {
                max_call_depth: 100_000,
                ..VmConfig::default()
            };
            let mut vm = VM::with_config(config, objects);
            let err = vm.run(&main, Value::Nil, vec![]).unwrap_err();
            (err, vm.call_depth())
        })
        .unwrap();
    let (err, depth_after) = worker.join().expect("worker should not overflow");
    let VmError::NativeStackExhausted(depth) = err else {
        panic!("expected native stack exhaustion, got {err}");
    };
    assert!(depth > 1 && depth < 100_000, "stopped at depth {depth}");
    assert_eq!(depth_after, 0);
}

#[test]
fn instruction_limit_stops_infinite_loops() {
    let mut asm = Assembler::new("spin");
    let top = asm.label();
    asm.bind(top);
    asm.jump(Opcode::Goto, top);
    let method = linked(asm);

    let config = VmConfig {
        instruction_limit: Some(100),
        ..VmConfig::default()
    };
    let mut vm = VM::with_config(config, Arc::new(ClassTable::with_builtins()));
    let err = vm.run(&method, Value::Nil, vec![]).unwrap_err();
    assert!(matches!(err, VmError::InstructionLimitExceeded(100)));
    assert_eq!(vm.instruction_count(), 101);
}

#[test]
fn entry_arity_is_checked() {
    let method = not_equal_method();
    let mut vm = machine();
    let err = vm.run(&method, Value::Nil, vec![Value::Int(1)]).unwrap_err();
    assert!(matches!(err, VmError::Arity { expected: 2, got: 1, .. }));
}

#[test]
fn created_context_starts_at_zero() {
    let method = not_equal_method();
    let vm = machine();
    let frame = vm
        .create_context(Arc::clone(&method), Value::Nil, vec![Value::Int(1), Value::Int(2)])
        .unwrap();
    assert_eq!(frame.ip(), 0);
    assert_eq!(frame.state(), FrameState::Entered);
    assert!(frame.stack().is_empty());
    assert_eq!(frame.registers(), &[Value::Int(1), Value::Int(2)]);
    assert_eq!(frame.caller(), None);
}
