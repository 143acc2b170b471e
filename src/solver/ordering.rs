//! Reverse Cuthill–McKee ordering of a matrix graph.

use std::collections::VecDeque;

/// RCM permutation of the graph `adj`; `perm[new] = old`.
///
/// Every connected component is started from a node of minimum degree and
/// neighbors are visited in order of increasing degree.
pub fn reverse_cuthill_mckee(adj: &[Vec<usize>]) -> Vec<usize> {
    let n = adj.len();
    let degree: Vec<usize> = adj.iter().map(Vec::len).collect();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut by_degree: Vec<usize> = (0..n).collect();
    by_degree.sort_by_key(|&i| (degree[i], i));
    let mut queue = VecDeque::new();
    for &start in &by_degree {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            let mut next: Vec<usize> = adj[i].iter().copied().filter(|&j| !visited[j]).collect();
            next.sort_by_key(|&j| (degree[j], j));
            for j in next {
                visited[j] = true;
                queue.push_back(j);
            }
        }
    }
    order.reverse();
    order
}

/// Inverse of a permutation.
pub fn invert(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; perm.len()];
    for (new, &old) in perm.iter().enumerate() {
        inv[old] = new;
    }
    inv
}

/// Largest `|i - j|` over the edges of `adj` after renumbering with `perm`.
pub fn bandwidth(adj: &[Vec<usize>], perm: &[usize]) -> usize {
    let pos = invert(perm);
    adj.iter()
        .enumerate()
        .flat_map(|(i, nbrs)| nbrs.iter().map(move |&j| (i, j)))
        .map(|(i, j)| pos[i].abs_diff(pos[j]))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::laplace_2d;

    #[test]
    fn rcm_is_a_permutation() {
        let adj = laplace_2d(5, 4).adjacency();
        let perm = reverse_cuthill_mckee(&adj);
        let mut sorted = perm.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn rcm_reduces_bandwidth_of_shuffled_path() {
        // path graph numbered 0-5-1-4-2-3
        let order = [0, 5, 1, 4, 2, 3];
        let mut adj = vec![Vec::new(); 6];
        for w in order.windows(2) {
            adj[w[0]].push(w[1]);
            adj[w[1]].push(w[0]);
        }
        let identity: Vec<usize> = (0..6).collect();
        let perm = reverse_cuthill_mckee(&adj);
        assert_eq!(bandwidth(&adj, &perm), 1);
        assert!(bandwidth(&adj, &identity) > 1);
    }
}
