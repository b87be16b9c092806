use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use faer::Mat;
use likelihood_mcmc::proposal::Kernel;
use likelihood_mcmc::{ChainState, Diagnostics, MultivariateProposal, ProposalFunction};
use rand::{rngs::SmallRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

fn make_proposal(dim: usize, kernel: Kernel) -> MultivariateProposal {
    let covariance = Mat::from_fn(dim, dim, |i, j| if i == j { 1.0 } else { 0.1 });
    MultivariateProposal::new(kernel, covariance, Default::default())
        .unwrap()
        .with_diagnostics(Diagnostics::silent())
}

fn window(dim: usize, len: usize) -> Vec<ChainState> {
    let mut rng = SmallRng::seed_from_u64(42);
    (0..len)
        .map(|_| ChainState::new((0..dim).map(|_| StandardNormal.sample(&mut rng)).collect()))
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    for dim in [10, 100] {
        let proposal = make_proposal(dim, Kernel::Gaussian);
        let current = vec![0.5; dim];
        let mut out = vec![0.; dim];
        let mut rng = SmallRng::seed_from_u64(42);
        c.bench_function(&format!("propose gaussian {dim}"), |b| {
            b.iter(|| proposal.propose(black_box(&current), &mut out, &mut rng))
        });

        let student = make_proposal(dim, Kernel::StudentT { degrees_of_freedom: 3.0 });
        c.bench_function(&format!("evaluate student-t {dim}"), |b| {
            b.iter(|| student.evaluate(black_box(&out), black_box(&current)))
        });

        let states = window(dim, 1000);
        c.bench_function(&format!("adapt {dim}"), |b| {
            b.iter_batched(
                || make_proposal(dim, Kernel::Gaussian),
                |mut proposal| proposal.adapt(&states, 0.3, 0.15, 0.35).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
