use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use faer::Mat;
use hymls::config::{DirectSolverOptions, HymlsParams};
use hymls::matrix::gallery::laplace_2d;
use hymls::preconditioner::{InversePreconditioner, Preconditioner};
use hymls::solver::{DirectSolver, SparseLu};

fn bench_apply_inverse(c: &mut Criterion) {
    let n = 64;
    let a = Arc::new(laplace_2d(n, n));
    let b = Mat::from_fn(n * n, 1, |i, _| (i as f64).sin());

    for levels in [2, 3] {
        let params = HymlsParams::for_grid_2d(n, n, 1).with_separator_length(8).with_levels(levels);
        let mut pc = Preconditioner::new(Arc::clone(&a), params).unwrap();
        pc.compute().unwrap();
        let mut x = Mat::zeros(n * n, 1);
        c.bench_function(&format!("hymls apply_inverse ({levels} levels)"), |ben| {
            ben.iter(|| pc.apply_inverse(black_box(b.as_ref()), x.as_mut()).unwrap())
        });
    }

    let mut lu = SparseLu::new(DirectSolverOptions::default());
    lu.factorize(&a).unwrap();
    c.bench_function("sparse LU solve", |ben| {
        ben.iter(|| {
            let mut x = black_box(b.clone());
            lu.solve_in_place(x.as_mut()).unwrap();
        })
    });
}

criterion_group!(benches, bench_apply_inverse);
criterion_main!(benches);
