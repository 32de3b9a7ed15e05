//! Compile failures: every phase reports a structured error and nothing is executed

use shadejit::{compile, CompileOptions, Compiler, Error, Stage};

fn generate(source: &str) -> Result<(), Error> {
    Compiler::new(CompileOptions::default())
        .generate(source)
        .map(|_| ())
}

#[test]
fn test_type_mismatch_names_both_types() {
    let source = "vec4 v;\nexport void main() {\n  v = 1.0;\n}";
    let err = compile(source, Stage::Vertex).unwrap_err();

    match &err {
        Error::Syntax {
            line,
            column,
            message,
            excerpt,
        } => {
            assert_eq!((*line, *column), (3, 5));
            assert_eq!(message, "Incompatible types for assignment 'vec4' and 'float'");
            assert_eq!(
                excerpt,
                "2     export void main() {\n\
                 3       v = 1.0;\n      \
                 \x20   ^ Incompatible types for assignment 'vec4' and 'float'\n\
                 \n\
                 4     }\n"
            );
        }
        other => panic!("expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_undefined_symbol_position() {
    let err = generate("export void main() {\n\tfloat f;\n\tf = g_unknown;\n}").unwrap_err();
    match err {
        Error::Syntax {
            line,
            column,
            message,
            excerpt,
        } => {
            assert_eq!((line, column), (3, 6));
            assert_eq!(message, "Undefined symbol 'g_unknown'");
            // tabs in the source line are kept in the caret line
            assert!(excerpt.contains("\n      \t    ^ Undefined symbol"));
        }
        other => panic!("expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_stage_decides_intrinsics() {
    let source = "export void main() { g_colour = g_world_normal; }";
    assert!(Compiler::new(CompileOptions::for_stage(Stage::Fragment))
        .generate(source)
        .is_ok());

    let err = generate(source).unwrap_err();
    assert_eq!(err.to_string(), "Undefined symbol 'g_colour'");
}

#[test]
fn test_lex_error() {
    let err = generate("export void main() { int x; x = 3 @ 4; }").unwrap_err();
    assert!(matches!(err, Error::Lex { line: 1, .. }));
    assert!(!err.is_syntax());
}

#[test]
fn test_end_of_input() {
    let err = generate("export void main() { int x; x = 3").unwrap_err();
    assert!(matches!(err, Error::UnexpectedEof { .. }));
    assert!(err.to_string().ends_with("at end of input"));
    assert!(err.excerpt().unwrap().ends_with("at end of input\n"));
}

#[test]
fn test_loops_fail_in_code_generation() {
    let source = "int i;\nexport void main() { while (i < 4) { i += 1; } }";
    let err = generate(source).unwrap_err();
    assert!(matches!(err, Error::MalformedTree { .. }));

    let source = "int i;\nexport void main() { for (i = 0; i < 4; i += 1) { } }";
    let err = generate(source).unwrap_err();
    assert!(matches!(err, Error::MalformedTree { .. }));
}

#[test]
fn test_relational_outside_condition() {
    let err = generate("bool b; export void main() { b = 2 > 1; }").unwrap_err();
    assert!(matches!(err, Error::MalformedTree { .. }));
}

#[test]
fn test_user_function_calls_are_unsupported() {
    let source = "float half(float x) { return x / 2.0; }\n\
                  float y;\n\
                  export void main() { y = half(3.0); }";
    let err = generate(source).unwrap_err();
    assert_eq!(
        err,
        Error::Unsupported {
            feature: "function call".to_string()
        }
    );
}

#[test]
fn test_vector_comparison_is_unsupported() {
    let source = "export void main() { if (g_position == g_normal) { } }";
    let err = generate(source).unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
}

#[test]
fn test_missing_entry_point() {
    assert_eq!(
        compile("void main() { }", Stage::Vertex).unwrap_err(),
        Error::MissingEntryPoint
    );
    assert_eq!(
        compile("export void start() { }", Stage::Vertex).unwrap_err(),
        Error::MissingEntryPoint
    );
}
