//! Sieve of Eratosthenes

/// All primes `<= n`, ascending
///
/// Multiples are crossed out starting at `p * p`; the square is computed with
/// `checked_mul` so bounds near `usize::MAX` stop cleanly instead of
/// overflowing.
#[must_use]
pub fn sieve_of_eratosthenes(n: usize) -> Vec<usize> {
    if n < 2 {
        return Vec::new();
    }

    let mut is_prime = vec![true; n + 1];
    let mut primes = Vec::new();

    for p in 2..=n {
        if !is_prime[p] {
            continue;
        }
        primes.push(p);

        let Some(start) = p.checked_mul(p) else {
            continue;
        };
        for multiple in (start..=n).step_by(p) {
            is_prime[multiple] = false;
        }
    }

    primes
}
