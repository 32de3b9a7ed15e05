use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shadejit::{compile, CompileOptions, Compiler, PlacementPolicy, Scanner, Stage};

const VERTEX_SHADER: &str = r#"
    export void main() {
        g_world_position = g_model * g_position;
        g_world_normal = normalize(g_normal_matrix * g_normal);
        g_projected_position = g_projection * g_view * g_world_position;
    }
"#;

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn scanner_benchmark(c: &mut Criterion) {
    c.bench_function("tokenize vertex shader", |b| {
        b.iter(|| Scanner::new(black_box(VERTEX_SHADER)).scan_tokens().unwrap())
    });
}

fn compile_benchmark(c: &mut Criterion) {
    for policy in [PlacementPolicy::MemoryFirst, PlacementPolicy::RegisterFirst] {
        let compiler = Compiler::new(CompileOptions {
            placement: policy,
            keep_listing: false,
            ..Default::default()
        });
        c.bench_function(&format!("generate vertex shader ({:?})", policy), |b| {
            b.iter(|| compiler.generate(black_box(VERTEX_SHADER)).unwrap())
        });
    }
}

fn execute_benchmark(c: &mut Criterion) {
    let mut shader = compile(VERTEX_SHADER, Stage::Vertex).unwrap();
    for matrix in ["g_model", "g_view", "g_projection", "g_normal_matrix"] {
        shader.write_global(matrix, &IDENTITY).unwrap();
    }
    shader.write_global("g_position", &[1.0f32, 2.0, 3.0, 1.0]).unwrap();
    shader.write_global("g_normal", &[0.0f32, 1.0, 0.0, 0.0]).unwrap();

    c.bench_function("execute vertex shader", |b| {
        b.iter(|| {
            shader.execute().unwrap();
            black_box(shader.read_global::<[f32; 4]>("g_projected_position").unwrap())
        })
    });
}

criterion_group!(benches, scanner_benchmark, compile_benchmark, execute_benchmark);
criterion_main!(benches);
