//! tests/integration.rs — batteries d’intégration pour saumon-core
//!
//! Chaque scénario compile et exécute un programme complet dans une VM à
//! stdout capturé, puis compare la sortie ligne à ligne. Lancement :
//!   cargo test -p saumon-core
//!   cargo test -p saumon-core --features nan-boxing
//!   cargo test -p saumon-core --features gc-stress

use saumon_core::{InterpretError, Vm, VmOptions};

// -----------------------------------------------------------------------------
// Helpers de test
// -----------------------------------------------------------------------------

fn run(source: &str) -> (Result<(), InterpretError>, String) {
    let mut vm = Vm::with_options(VmOptions { capture_stdout: true });
    let result = vm.interpret(source);
    (result, vm.take_output())
}

fn expect_output(source: &str, expected: &str) {
    let (result, output) = run(source);
    assert_eq!(result, Ok(()), "échec d’exécution pour: {source}");
    assert_eq!(output, expected, "sortie inattendue pour: {source}");
}

// -----------------------------------------------------------------------------
// Expressions, variables, chaînes
// -----------------------------------------------------------------------------

#[test]
fn arithmetic_precedence() {
    expect_output("print 1 + 2 * 3;", "7\n");
    expect_output("print (1 + 2) * 3;", "9\n");
    expect_output("print -4 + 2;", "-2\n");
    expect_output("print 10 / 4;", "2.5\n");
}

#[test]
fn string_concatenation() {
    expect_output("var a = \"foo\"; var b = \"bar\"; print a + b;", "foobar\n");
}

#[test]
fn interned_strings_compare_equal() {
    expect_output("print \"abc\" == \"ab\" + \"c\";", "true\n");
}

#[test]
fn printing_every_shape() {
    expect_output("print true; print false; print nil;", "true\nfalse\nnil\n");
    expect_output("fun f() {} print f;", "<fn f>\n");
    expect_output("print clock;", "<native fn>\n");
    expect_output("class A {} print A; print A();", "A\nA instance\n");
    expect_output("class A { m() {} } print A().m;", "<fn m>\n");
}

#[test]
fn logical_operators_short_circuit() {
    expect_output("print true and 2; print false and 2;", "2\nfalse\n");
    expect_output("print nil or \"oui\"; print 1 or 2;", "oui\n1\n");
    // le côté droit ne doit pas s’évaluer : sinon erreur runtime
    expect_output("var a = false; print a and inconnue;", "false\n");
}

// -----------------------------------------------------------------------------
// Contrôle de flot
// -----------------------------------------------------------------------------

#[test]
fn if_else_branches() {
    expect_output("if (1 < 2) print \"alors\"; else print \"sinon\";", "alors\n");
    expect_output("if (1 > 2) print \"alors\"; else print \"sinon\";", "sinon\n");
}

#[test]
fn while_and_for_loops() {
    expect_output(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        "0\n1\n2\n",
    );
    expect_output("for (var i = 0; i < 3; i = i + 1) print i;", "0\n1\n2\n");
    // for sans clauses de condition/incrément dans le corps
    expect_output(
        "var total = 0; for (var i = 1; i <= 4; i = i + 1) total = total + i; print total;",
        "10\n",
    );
}

// -----------------------------------------------------------------------------
// Fonctions & fermetures
// -----------------------------------------------------------------------------

#[test]
fn fibonacci_recursion() {
    expect_output(
        "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2);} print fib(10);",
        "55\n",
    );
}

#[test]
fn closures_share_their_captured_slot() {
    expect_output(
        "fun outer(){ var x=1; fun inner(){ x=x+1; return x; } return inner; } \
         var c=outer(); print c(); print c();",
        "2\n3\n",
    );
}

#[test]
fn two_closures_one_upvalue() {
    expect_output(
        "var get; var set; \
         fun main() { var a = \"initial\"; \
           fun g() { return a; } fun s(v) { a = v; } \
           get = g; set = s; } \
         main(); set(\"changé\"); print get();",
        "changé\n",
    );
}

#[test]
fn upvalues_close_at_scope_exit() {
    expect_output(
        "var fns = nil; \
         { var i = 10; fun f() { return i; } fns = f; } \
         print fns();",
        "10\n",
    );
}

// -----------------------------------------------------------------------------
// Classes
// -----------------------------------------------------------------------------

#[test]
fn inherited_method_is_callable() {
    expect_output(
        "class A { greet(){ print \"hi\"; } } class B < A {} B().greet();",
        "hi\n",
    );
}

#[test]
fn initializer_and_state() {
    expect_output(
        "class Counter { init(){ this.n = 0; } tick(){ this.n = this.n + 1; return this.n; } } \
         var c = Counter(); print c.tick(); print c.tick();",
        "1\n2\n",
    );
}

#[test]
fn fields_shadow_methods() {
    expect_output(
        "class A { m() { return \"méthode\"; } } \
         var a = A(); a.m = \"champ\"; print a.m;",
        "champ\n",
    );
}

#[test]
fn bound_methods_carry_their_receiver() {
    expect_output(
        "class A { init() { this.v = 42; } get() { return this.v; } } \
         var m = A().get; print m();",
        "42\n",
    );
}

#[test]
fn super_calls_the_parent_version() {
    expect_output(
        "class A { m() { return \"A\"; } } \
         class B < A { m() { return super.m() + \"B\"; } } \
         print B().m();",
        "AB\n",
    );
}

#[test]
fn overriding_wins_over_inheritance() {
    expect_output(
        "class A { m() { return \"parent\"; } } \
         class B < A { m() { return \"enfant\"; } } \
         print B().m();",
        "enfant\n",
    );
}

// -----------------------------------------------------------------------------
// Erreurs attendues
// -----------------------------------------------------------------------------

#[test]
fn undefined_variable_is_runtime() {
    let (result, _) = run("print x;");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn mixed_addition_is_runtime() {
    let (result, _) = run("1 + \"a\";");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn runaway_recursion_overflows() {
    let (result, _) = run("fun f(){ f(); } f();");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn compile_errors_are_reported_as_such() {
    assert_eq!(run("print ;").0, Err(InterpretError::Compile));
    assert_eq!(run("var = 3;").0, Err(InterpretError::Compile));
    assert_eq!(run("{").0, Err(InterpretError::Compile));
}

#[test]
fn property_access_needs_an_instance() {
    assert_eq!(run("print 3.champ;").0, Err(InterpretError::Runtime));
    assert_eq!(run("3.champ = 1;").0, Err(InterpretError::Runtime));
    assert_eq!(run("3.methode();").0, Err(InterpretError::Runtime));
}

#[test]
fn superclass_must_be_a_class() {
    let (result, _) = run("var pas_une_classe = 1; class A < pas_une_classe {}");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn missing_property_is_runtime() {
    let (result, _) = run("class A {} print A().absent;");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn class_arity_defaults_to_zero() {
    let (result, _) = run("class A {} A(1);");
    assert_eq!(result, Err(InterpretError::Runtime));
}

// -----------------------------------------------------------------------------
// Un programme qui churne (GC au travail)
// -----------------------------------------------------------------------------

#[test]
fn string_churn_survives_collection() {
    expect_output(
        "var acc = \"\"; \
         for (var i = 0; i < 60; i = i + 1) { acc = acc + \"ab\"; } \
         var again = \"\"; \
         for (var i = 0; i < 60; i = i + 1) { again = again + \"ab\"; } \
         print acc == again;",
        "true\n",
    );
}

#[test]
fn closures_and_classes_churn() {
    expect_output(
        "fun compteur() { var n = 0; fun tick() { n = n + 1; return n; } return tick; } \
         var total = 0; \
         for (var i = 0; i < 20; i = i + 1) { \
           var t = compteur(); t(); total = total + t(); \
         } \
         print total;",
        "40\n",
    );
}
