//! Machines on separate threads share linked methods, the object model and
//! the handler table.

use std::sync::Arc;
use std::thread;
use strand_vm::assembler::Assembler;
use strand_vm::object::{ClassTable, ObjectModel};
use strand_vm::opcode::Opcode;
use strand_vm::values::Value;
use strand_vm::vm::{link, HandlerTable, LinkedMethod, HANDLERS, VM};

fn linked(asm: Assembler) -> Arc<LinkedMethod> {
    let method = asm.finish().expect("method should assemble");
    Arc::new(link(&method).expect("method should link"))
}

/// `Integer#triangle`: 1 + 2 + ... + self, computed with a loop.
fn triangle() -> Arc<LinkedMethod> {
    let mut asm = Assembler::new("triangle").registers(2);
    let top = asm.label();
    let done = asm.label();
    asm.op(Opcode::PushSelf).set_local(0).op(Opcode::Pop);
    asm.push_int(0).set_local(1).op(Opcode::Pop);
    asm.bind(top);
    asm.push_local(0).push_int(0).op(Opcode::LessEqual).jump(Opcode::GotoIfTrue, done);
    asm.push_local(1).push_local(0).op(Opcode::Add).set_local(1).op(Opcode::Pop);
    asm.push_local(0).push_int(1).op(Opcode::Sub).set_local(0).op(Opcode::Pop);
    asm.jump(Opcode::Goto, top);
    asm.bind(done);
    asm.push_local(1).op(Opcode::Return);
    linked(asm)
}

#[test]
fn threads_share_methods_and_object_model() {
    let mut table = ClassTable::with_builtins();
    table.define_compiled("Integer", "triangle", triangle());
    let objects: Arc<dyn ObjectModel> = Arc::new(table);

    let mut main = Assembler::new("main").arity(1);
    main.push_local(0).send("triangle", 0).op(Opcode::Return);
    let main = linked(main);

    let handles: Vec<_> = (1..=8)
        .map(|n: i64| {
            let main = Arc::clone(&main);
            let objects = Arc::clone(&objects);
            thread::spawn(move || {
                let mut vm = VM::new(objects);
                let mut results = Vec::new();
                for round in 0..50 {
                    let arg = n * 100 + round;
                    let value = vm.run(&main, Value::Nil, vec![Value::Int(arg)]).unwrap();
                    results.push((arg, value));
                }
                results
            })
        })
        .collect();

    for handle in handles {
        for (arg, value) in handle.join().expect("worker panicked") {
            assert_eq!(value, Value::Int(arg * (arg + 1) / 2));
        }
    }
    // only the test's own handles remain
    assert_eq!(Arc::strong_count(&main), 1);
}

#[test]
fn handler_table_is_built_once_per_process() {
    let addresses: Vec<usize> = (0..4)
        .map(|_| thread::spawn(|| &*HANDLERS as *const HandlerTable as usize))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();
    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
}
