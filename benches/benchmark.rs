use asmdiff::executable::{ExeSectionInfo, ExeSectionType, Executable};
use asmdiff::function::{Function, FunctionSetup};
use asmdiff::instruction::AsmFormat;
use asmdiff::matcher::AsmMatcher;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Builds an executable whose code section repeats a small function body.
fn build_executable(repeats: usize) -> Executable {
    // push ebp; mov ebp, esp; je +2; xor eax, eax; call +2; pop ebp; ret
    let body: &[u8] = &[
        0x55, 0x89, 0xe5, 0x74, 0x02, 0x31, 0xc0, 0xe8, 0x02, 0x00, 0x00, 0x00, 0x90, 0x90, 0x5d,
        0xc3,
    ];
    let mut data = Vec::with_capacity(body.len() * repeats);
    for _ in 0..repeats {
        data.extend_from_slice(body);
    }

    let mut exe = Executable::new();
    exe.set_image_base(0x400000);
    exe.add_section(ExeSectionInfo {
        name: ".text".into(),
        section_type: ExeSectionType::Code,
        address: 0x1000,
        size: data.len() as u64,
        data,
    });
    exe
}

pub fn benchmark(c: &mut Criterion) {
    let repeats = 256;
    let exe = build_executable(repeats);
    let end_address = 0x1000 + (repeats as u64) * 16;

    let mut g = c.benchmark_group("group");
    g.sample_size(20);

    g.bench_function("disassemble", |b| {
        b.iter(|| {
            let setup = FunctionSetup::new(&exe, AsmFormat::Default);
            let mut function = Function::new();
            function.disassemble(&setup, black_box(0x1000), black_box(end_address));
            black_box(function.get_instructions().len())
        })
    });

    let setup = FunctionSetup::new(&exe, AsmFormat::Default);
    let mut left = Function::new();
    left.disassemble(&setup, 0x1000, end_address);
    let mut right = Function::new();
    right.disassemble(&setup, 0x1000, end_address);

    g.bench_function("compare", |b| {
        b.iter(|| {
            let result = AsmMatcher::run_comparison([black_box(&left), black_box(&right)], 20);
            black_box(result.match_count)
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
