//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria & stats.
#[derive(Clone, Debug)]
pub struct Convergence<T> {
    /// Relative residual reduction to reach.
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    ///
    /// `converged` only reports a reached tolerance; hitting `max_iters`
    /// stops without converging.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm > T::zero() { res_norm / res0_norm } else { T::zero() };
        let converged = rel <= self.tol;
        (
            converged || i >= self.max_iters,
            SolveStats { iterations: i, final_residual: res_norm, converged },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_iters_stops_without_converging() {
        let conv = Convergence { tol: 1e-8, max_iters: 10 };
        let (stop, stats) = conv.check(1e-3, 1.0, 10);
        assert!(stop);
        assert!(!stats.converged);
        let (stop, stats) = conv.check(1e-9, 1.0, 3);
        assert!(stop && stats.converged);
    }
}
