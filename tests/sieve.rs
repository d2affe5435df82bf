//! Sieve output checked against trial division

use bgremove_server::sieve_of_eratosthenes;

fn is_prime_by_trial_division(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

#[test]
fn test_matches_trial_division_up_to_2000() {
    for n in 0..=2000 {
        let expected: Vec<usize> = (0..=n).filter(|&k| is_prime_by_trial_division(k)).collect();
        assert_eq!(sieve_of_eratosthenes(n), expected, "n = {n}");
    }
}

#[test]
fn test_output_is_strictly_ascending() {
    let primes = sieve_of_eratosthenes(5000);
    assert!(primes.windows(2).all(|pair| pair[0] < pair[1]));
}
