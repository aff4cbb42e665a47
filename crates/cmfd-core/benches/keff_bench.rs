// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — k-eff Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use cmfd_core::currents::{SegmentCrossings, SurfaceCrossing};
use cmfd_core::quadrature::TabulatedQuadrature;
use cmfd_core::Cmfd;
use cmfd_types::config::CmfdConfig;
use cmfd_types::constants::NUM_FACES;
use cmfd_types::material::{BoundaryType, Material};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rayon::prelude::*;
use std::hint::black_box;
use std::sync::Arc;

const FSRS_PER_CELL: usize = 8;

fn setup(n: usize) -> (Cmfd, Vec<f64>) {
    let mut cfg = CmfdConfig::default();
    cfg.lattice.num_x = n;
    cfg.lattice.num_y = n;
    cfg.lattice.width_x = 1.26 * n as f64;
    cfg.lattice.width_y = 1.26 * n as f64;
    cfg.boundaries = [BoundaryType::Vacuum; NUM_FACES];
    cfg.boundaries[0] = BoundaryType::Reflective;
    cfg.boundaries[1] = BoundaryType::Reflective;
    cfg.num_moc_groups = 2;

    let fuel = Arc::new(
        Material::new(
            "fuel",
            vec![0.5, 1.3],
            vec![0.4, 0.05, 0.0, 1.1],
            vec![0.02, 0.3],
            vec![1.0, 0.0],
        )
        .unwrap(),
    );
    let num_fsrs = n * n * FSRS_PER_CELL;
    let mut cmfd = Cmfd::new(cfg);
    cmfd.set_quadrature(Arc::new(
        TabulatedQuadrature::tabuchi_yamamoto(16, 4, 0.05).unwrap(),
    ));
    cmfd.set_fine_regions(
        vec![1.26 * 1.26 / FSRS_PER_CELL as f64; num_fsrs],
        vec![fuel; num_fsrs],
    )
    .unwrap();
    cmfd.set_cell_fsrs(
        (0..n * n)
            .map(|c| (c * FSRS_PER_CELL..(c + 1) * FSRS_PER_CELL).collect())
            .collect(),
    );
    cmfd.initialize().unwrap();
    let flux = (0..num_fsrs * 2).map(|i| 1.0 + (i % 7) as f64 * 0.1).collect();
    (cmfd, flux)
}

fn bench_compute_keff(c: &mut Criterion) {
    let mut group = c.benchmark_group("cmfd_compute_keff");
    group.sample_size(20);
    for n in [8usize, 17] {
        let (mut cmfd, flux0) = setup(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut flux = flux0.clone();
                let res = cmfd.compute_keff(&mut flux, None, 0).unwrap();
                black_box(res.k_eff)
            })
        });
    }
    group.finish();
}

fn bench_tally_current(c: &mut Criterion) {
    let (cmfd, _) = setup(17);
    let segments: Vec<SegmentCrossings> = (0..4096)
        .map(|i| SegmentCrossings {
            forward: Some(SurfaceCrossing {
                cell: i % (17 * 17),
                surface: [0, 1, 3, 4][i % 4],
            }),
            backward: None,
        })
        .collect();
    let psi = vec![0.5; 2 * 2];

    c.bench_function("tally_current_4096_parallel", |b| {
        b.iter(|| {
            segments.par_iter().for_each(|seg| {
                cmfd.tally_current(seg, &psi, 0, 0, true).unwrap();
            })
        })
    });
}

criterion_group!(benches, bench_compute_keff, bench_tally_current);
criterion_main!(benches);
