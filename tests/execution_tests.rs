//! End-to-end execution of compiled shaders
//! Demonstrates: Scanner → Parser → CodeGenerator → RuntimeObject → native call
#![cfg(all(unix, target_arch = "x86_64"))]

use shadejit::{compile, CompileOptions, Compiler, PlacementPolicy, Residency, RuntimeObject, Stage};

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn vertex(source: &str) -> RuntimeObject {
    compile(source, Stage::Vertex).unwrap()
}

fn register_first(source: &str) -> RuntimeObject {
    let options = CompileOptions {
        placement: PlacementPolicy::RegisterFirst,
        ..Default::default()
    };
    Compiler::new(options).compile(source).unwrap()
}

fn assert_close(actual: [f32; 4], expected: [f32; 4], tolerance: f32) {
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!(
            (a - e).abs() <= tolerance,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }
}

#[test]
fn test_vertex_passthrough() {
    let mut shader = vertex(
        "export void main() {
            g_world_position = g_model * g_position;
            g_projected_position = g_projection * g_view * g_model * g_position;
        }",
    );

    shader.write_global("g_model", &IDENTITY).unwrap();
    shader.write_global("g_view", &IDENTITY).unwrap();
    shader.write_global("g_projection", &IDENTITY).unwrap();
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 1.0]).unwrap();
    shader.execute().unwrap();

    let world: [f32; 4] = shader.read_global("g_world_position").unwrap();
    let projected: [f32; 4] = shader.read_global("g_projected_position").unwrap();
    assert_eq!(world, [1.0, 2.0, 3.0, 1.0]);
    assert_eq!(projected, [1.0, 2.0, 3.0, 1.0]);
}

#[test]
fn test_transform_applies_rows() {
    let mut shader = vertex("export void main() { g_world_position = g_model * g_position; }");

    // translation by (10, 20, 30) in the last column
    let translate = [
        [1.0, 0.0, 0.0, 10.0],
        [0.0, 1.0, 0.0, 20.0],
        [0.0, 0.0, 1.0, 30.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    shader.write_global("g_model", &translate).unwrap();
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 1.0]).unwrap();
    shader.execute().unwrap();

    let world: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(world, [11.0, 22.0, 33.0, 1.0]);
}

#[test]
fn test_matrix_product() {
    let mut shader = vertex(
        "mat4x4 product;
        export void main() { product = g_view * g_model; }",
    );

    let scale = [
        [2.0, 0.0, 0.0, 0.0],
        [0.0, 3.0, 0.0, 0.0],
        [0.0, 0.0, 4.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let shift = [
        [1.0, 0.0, 0.0, 5.0],
        [0.0, 1.0, 0.0, 6.0],
        [0.0, 0.0, 1.0, 7.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    shader.write_global("g_view", &scale).unwrap();
    shader.write_global("g_model", &shift).unwrap();
    shader.execute().unwrap();

    let product: [[f32; 4]; 4] = shader.read_global("product").unwrap();
    assert_eq!(
        product,
        [
            [2.0, 0.0, 0.0, 10.0],
            [0.0, 3.0, 0.0, 18.0],
            [0.0, 0.0, 4.0, 28.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    );
}

#[test]
fn test_scalar_arithmetic() {
    let mut shader = vertex(
        "int x; int y;
        export void main() { x = 2; y = 3; x = x * y; }",
    );
    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("x").unwrap(), 6);
    assert_eq!(shader.read_global::<i32>("y").unwrap(), 3);
}

#[test]
fn test_mixed_arithmetic_and_conversions() {
    let mut shader = vertex(
        "int i; int k; float f; float g;
        export void main() {
            f = i * 2.5;
            k = 7.9;
            g = (f - 1.0) / 2.0 + -i;
            i += 1;
        }",
    );
    shader.write_global("i", &4i32).unwrap();
    shader.execute().unwrap();

    assert_eq!(shader.read_global::<f32>("f").unwrap(), 10.0);
    assert_eq!(shader.read_global::<i32>("k").unwrap(), 7);
    assert_eq!(shader.read_global::<f32>("g").unwrap(), 0.5);
    assert_eq!(shader.read_global::<i32>("i").unwrap(), 5);
}

#[test]
fn test_integer_division_truncates() {
    let mut shader = vertex(
        "int q; int r; int s; int d;
        export void main() { q = 17 / 5; r = -17 / 5; s = q / d; }",
    );
    shader.write_global("d", &-1i32).unwrap();
    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("q").unwrap(), 3);
    assert_eq!(shader.read_global::<i32>("r").unwrap(), -3);
    assert_eq!(shader.read_global::<i32>("s").unwrap(), -3);
}

#[test]
fn test_division_with_every_register_taken() {
    // a, b, c and d occupy the whole general-purpose pool
    let mut shader = register_first(
        "export void main() {
            int a = 7; int b = 6; int c = 20; int d = 3;
            d = c / a;
            b = b / d;
            a = (c + 1) / b;
            g_world_position[0] = d * 100 + b * 10 + a;
            c = -c / a;
            g_world_position[1] = c;
        }",
    );
    shader.execute().unwrap();

    let world: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(world[0], 237.0);
    assert_eq!(world[1], -2.0);
}

#[test]
fn test_empty_statements() {
    let mut shader = vertex(
        "bool b; int y;
        export void main() {
            ;
            if (b) { ; } else { ; ; }
            y = 4;;
            if (b) { y = 5; } else { ; }
        }",
    );

    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("y").unwrap(), 4);

    shader.write_global("b", &true).unwrap();
    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("y").unwrap(), 5);

    assert!(vertex("export void main() { ; }").execute().is_ok());
}

#[test]
fn test_subscript_write() {
    let mut shader = vertex(
        "vec4 v;
        export void main() { v[0] = 1.0; v[1] = 2.0; }",
    );
    shader.execute().unwrap();
    let v: [f32; 4] = shader.read_global("v").unwrap();
    assert_eq!(v, [1.0, 2.0, 0.0, 0.0]);
}

#[test]
fn test_register_lanes() {
    let mut shader = register_first(
        "export void main() {
            vec4 v = g_normal;
            v[0] = 1.0;
            v[1] = 2.0;
            float f = v[3];
            v[2] = f + 1;
            g_world_position = v;
        }",
    );
    shader.write_global("g_normal", &[9.0f32, 9.0, 9.0, 4.0]).unwrap();
    shader.execute().unwrap();

    let v: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(v, [1.0, 2.0, 5.0, 4.0]);
}

#[test]
fn test_dynamic_subscripts() {
    let mut shader = vertex(
        "int i; int j; float f; vec4 row; vec4 v;
        export void main() {
            f = g_position[i];
            row = g_model[j];
            v[i] = 8.0;
            v[j] = g_model[j][i];
        }",
    );
    let mut model = IDENTITY;
    model[1][2] = 7.0;
    shader.write_global("g_model", &model).unwrap();
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    shader.write_global("i", &2i32).unwrap();
    shader.write_global("j", &1i32).unwrap();
    shader.execute().unwrap();

    assert_eq!(shader.read_global::<f32>("f").unwrap(), 3.0);
    assert_eq!(shader.read_global::<[f32; 4]>("row").unwrap(), [0.0, 1.0, 7.0, 0.0]);
    assert_eq!(shader.read_global::<[f32; 4]>("v").unwrap(), [0.0, 7.0, 8.0, 0.0]);
}

#[test]
fn test_dynamic_subscript_on_register_vector() {
    let mut shader = register_first(
        "export void main() {
            vec4 v = g_position;
            int i = 1;
            v[i] = 5.0;
            v[i + 1] += v[i];
            g_world_position = v;
        }",
    );
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    shader.execute().unwrap();

    let v: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(v, [1.0, 5.0, 8.0, 4.0]);
}

#[test]
fn test_branch_selection() {
    for (x, expected) in [(5, 1), (1, 2)] {
        let source = format!(
            "int y;
            export void main() {{ int x = {}; y = 0; if (x > 3) {{ y = 1; }} else {{ y = 2; }} }}",
            x
        );
        let mut shader = vertex(&source);
        shader.execute().unwrap();
        assert_eq!(shader.read_global::<i32>("y").unwrap(), expected, "x = {}", x);
    }
}

#[test]
fn test_condition_kinds() {
    let mut shader = vertex(
        "int i; float f; bool b; int out;
        export void main() {
            out = 0;
            if (f <= 2.5) { out += 1; }
            if (i != 3) { out += 10; } else if (i == 3) { out += 100; }
            if (b) { out += 1000; }
            if (!b) { out += 10000; }
            if (f > i) { out += 100000; }
        }",
    );

    shader.write_global("f", &2.5f32).unwrap();
    shader.write_global("i", &3i32).unwrap();
    shader.write_global("b", &true).unwrap();
    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("out").unwrap(), 1101);

    shader.write_global("f", &9.0f32).unwrap();
    shader.write_global("i", &4i32).unwrap();
    shader.write_global("b", &false).unwrap();
    shader.execute().unwrap();
    assert_eq!(shader.read_global::<i32>("out").unwrap(), 110010);
}

#[test]
fn test_vector_arithmetic() {
    let mut shader = vertex(
        "vec4 sum; vec4 scaled; vec4 negated;
        export void main() {
            sum = g_position + g_normal;
            scaled = g_position * 2.0;
            scaled *= 2;
            negated = -(g_position - g_normal);
        }",
    );
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    shader.write_global("g_normal", &[0.5f32, 0.5, 0.5, 0.5]).unwrap();
    shader.execute().unwrap();

    assert_eq!(shader.read_global::<[f32; 4]>("sum").unwrap(), [1.5, 2.5, 3.5, 4.5]);
    assert_eq!(shader.read_global::<[f32; 4]>("scaled").unwrap(), [4.0, 8.0, 12.0, 16.0]);
    assert_eq!(
        shader.read_global::<[f32; 4]>("negated").unwrap(),
        [-0.5, -1.5, -2.5, -3.5]
    );
}

#[test]
fn test_mat3_times_vec3() {
    let mut shader = vertex(
        "mat3x3 m; vec3 v; vec3 out;
        export void main() { out = m * v; }",
    );
    shader
        .write_global(
            "m",
            &[
                [1.0f32, 2.0, 3.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 2.0, 0.0],
            ],
        )
        .unwrap();
    // the padding lane must not leak into the result
    shader.write_global("v", &[1.0f32, 1.0, 1.0, 100.0]).unwrap();
    shader.execute().unwrap();

    assert_eq!(shader.read_global::<[f32; 4]>("out").unwrap(), [6.0, 1.0, 2.0, 0.0]);
}

#[test]
fn test_intrinsics() {
    let mut shader = vertex(
        "vec4 n; float len; float d; float c; float m;
        export void main() {
            n = normalize(g_normal);
            len = length(g_normal);
            d = dot3(g_normal, g_position);
            c = clamp(len, 0.0, 1.0);
            m = max(d, 20);
            nop(1);
        }",
    );
    shader.write_global("g_normal", &[3.0f32, 4.0, 0.0, 0.0]).unwrap();
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 9.0]).unwrap();
    shader.execute().unwrap();

    // rsqrtps is an approximation
    assert_close(shader.read_global("n").unwrap(), [0.6, 0.8, 0.0, 0.0], 1e-3);
    assert_eq!(shader.read_global::<f32>("len").unwrap(), 5.0);
    assert_eq!(shader.read_global::<f32>("d").unwrap(), 11.0);
    assert_eq!(shader.read_global::<f32>("c").unwrap(), 1.0);
    assert_eq!(shader.read_global::<f32>("m").unwrap(), 20.0);
}

#[test]
fn test_clamp_bounds() {
    let mut shader = vertex("float x; float y; export void main() { y = clamp(x, -1.0, 2.0); }");
    for (x, expected) in [(-5.0f32, -1.0f32), (0.25, 0.25), (3.0, 2.0)] {
        shader.write_global("x", &x).unwrap();
        shader.execute().unwrap();
        assert_eq!(shader.read_global::<f32>("y").unwrap(), expected);
    }
}

#[test]
fn test_fragment_shading() {
    let mut shader = compile(
        "export void main() {
            float diffuse = max(dot3(normalize(g_light0_position - g_world_position), g_world_normal), 0.0);
            g_colour = g_world_normal * 0.0;
            g_colour[0] = diffuse;
            g_colour[3] = 1.0;
        }",
        Stage::Fragment,
    )
    .unwrap();
    shader.write_global("g_world_position", &[0.0f32, 0.0, 0.0, 1.0]).unwrap();
    shader.write_global("g_world_normal", &[0.0f32, 1.0, 0.0, 0.0]).unwrap();
    shader.write_global("g_light0_position", &[0.0f32, 10.0, 0.0, 1.0]).unwrap();
    shader.execute().unwrap();

    assert_close(shader.read_global("g_colour").unwrap(), [1.0, 0.0, 0.0, 1.0], 1e-3);
}

#[test]
fn test_round_trip_before_execute() {
    let mut shader = vertex("vec4 tint; mat4x4 m; export void main() { }");
    shader.write_global("tint", &[0.1f32, 0.2, 0.3, 0.4]).unwrap();
    shader.write_global("m", &IDENTITY).unwrap();
    assert_eq!(shader.read_global::<[f32; 4]>("tint").unwrap(), [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(shader.read_global::<[[f32; 4]; 4]>("m").unwrap(), IDENTITY);
}

#[test]
fn test_execute_is_idempotent() {
    let mut shader = vertex(
        "vec4 acc;
        export void main() { acc = g_position * 3.0; acc -= g_position; }",
    );
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    shader.execute().unwrap();
    let first: [f32; 4] = shader.read_global("acc").unwrap();
    shader.execute().unwrap();
    let second: [f32; 4] = shader.read_global("acc").unwrap();

    assert_eq!(first, [2.0, 4.0, 6.0, 8.0]);
    assert_eq!(first, second);
}

#[test]
fn test_constants_are_deduplicated() {
    let shader = vertex(
        "float a; float b; float c;
        export void main() { a = 0.75; b = 0.75; c = a + 0.75; }",
    );
    let offsets: Vec<u32> = shader
        .float_constants()
        .iter()
        .filter(|(value, _)| *value == 0.75)
        .map(|(_, offset)| *offset)
        .collect();
    assert_eq!(offsets.len(), 1);
}

#[test]
fn test_register_first_globals() {
    let mut shader = register_first(
        "float scale;
        export void main() { g_world_position = g_position * scale; }",
    );
    assert_eq!(shader.global("scale").unwrap().residency, Residency::Register);
    assert!(matches!(
        shader.global("g_world_position").unwrap().residency,
        Residency::Memory(_)
    ));

    shader.write_global("scale", &0.5f32).unwrap();
    shader.write_global("g_position", &[2.0f32, 4.0, 6.0, 8.0]).unwrap();
    shader.execute().unwrap();
    let world: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(world, [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_register_pressure_spills() {
    // more live temporaries than the SSE pool holds
    let mut shader = register_first(
        "float a;
        export void main() {
            float b = a + 1.0; float c = a + 2.0; float d = a + 3.0;
            float e = a + 4.0; float f = a + 5.0; float g = a + 6.0;
            g_world_position[0] = (b + c) * (d + e) + (f - g) * (b - c) + (d * e - f * g) / 2.0;
        }",
    );
    shader.write_global("a", &1.0f32).unwrap();
    shader.execute().unwrap();
    // b..g = 2..7
    let expected = (2.0 + 3.0) * (4.0 + 5.0) + (6.0 - 7.0) * (2.0 - 3.0) + (4.0 * 5.0 - 6.0 * 7.0) / 2.0;
    let world: [f32; 4] = shader.read_global("g_world_position").unwrap();
    assert_eq!(world[0], expected);
}

#[test]
fn test_objects_run_on_separate_threads() {
    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let mut shader = vertex("int x; int y; export void main() { y = x * x; }");
            std::thread::spawn(move || {
                shader.write_global("x", &n).unwrap();
                shader.execute().unwrap();
                shader.read_global::<i32>("y").unwrap()
            })
        })
        .collect();

    let squares: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(squares, vec![1, 4, 9, 16]);
}

#[test]
fn test_listing_names_symbols() {
    let shader = vertex("export void main() { g_world_position = g_model * g_position; }");
    let listing = shader.listing("main").unwrap();
    assert_eq!(listing[0], "call trampoline");
    assert!(listing
        .iter()
        .any(|l| l.starts_with("movups xmm") && l.ends_with(",[g_model]")));
    assert_eq!(listing.last().map(String::as_str), Some("ret"));
    assert!(shader.has_export("main"));
    assert_eq!(shader.exports(), vec!["main"]);
}
