use cmfd_math::sor::{sor_solve, sor_step, SorConfig};
use cmfd_math::sparse::{CsrBuilder, CsrMatrix};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn operator(nx: usize, ny: usize, ng: usize) -> CsrMatrix {
    let mut b = CsrBuilder::new_square(nx * ny * ng);
    for y in 0..ny {
        for x in 0..nx {
            let cell = x + nx * y;
            for e in 0..ng {
                let row = cell * ng + e;
                b.add(row, row, 2.2);
                if x > 0 {
                    b.add(row, (cell - 1) * ng + e, -0.5);
                }
                if x + 1 < nx {
                    b.add(row, (cell + 1) * ng + e, -0.5);
                }
                if y > 0 {
                    b.add(row, (cell - nx) * ng + e, -0.5);
                }
                if y + 1 < ny {
                    b.add(row, (cell + nx) * ng + e, -0.5);
                }
                if e > 0 {
                    b.add(row, row - 1, -0.1);
                }
            }
        }
    }
    b.build()
}

fn colors(nx: usize, ny: usize) -> Vec<u8> {
    (0..nx * ny).map(|c| ((c % nx + c / nx) % 2) as u8).collect()
}

fn bench_sor_step_17x17(c: &mut Criterion) {
    let a = operator(17, 17, 2);
    let diag = a.diagonal();
    let b = vec![1.0; a.n_rows()];
    let mut x = vec![1.0; a.n_rows()];
    let col = colors(17, 17);

    c.bench_function("sor_step_17x17x2", |bch| {
        bch.iter(|| sor_step(&a, &diag, &mut x, &b, &col, 2, 1.5, None))
    });
}

fn bench_sor_solve_34x34(c: &mut Criterion) {
    let a = operator(34, 34, 2);
    let b = vec![1.0; a.n_rows()];
    let col = colors(34, 34);
    let cfg = SorConfig {
        omega: 1.6,
        tol: 1e-8,
        ..SorConfig::default()
    };

    let mut group = c.benchmark_group("sor_solve_34x34x2");
    group.sample_size(10);
    group.bench_function("tol_1e-8", |bch| {
        bch.iter(|| {
            let mut x = vec![1.0; a.n_rows()];
            let res = sor_solve(&a, &mut x, &b, &col, 2, &cfg);
            black_box(res.map(|r| r.iterations).unwrap_or(0));
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sor_step_17x17, bench_sor_solve_34x34);
criterion_main!(benches);
