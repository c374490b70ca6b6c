//! Probabilistic prime generation for Paillier key material

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

/// Miller-Rabin witnesses tried per candidate
pub const MILLER_RABIN_ROUNDS: usize = 40;

/// Odd primes used to discard candidates before running Miller-Rabin
const SMALL_PRIMES: [u32; 53] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Test whether `candidate` is prime with error probability at most 4^-rounds
pub fn is_probable_prime<R: RngCore + CryptoRng>(
    candidate: &BigUint,
    rounds: usize,
    rng: &mut R,
) -> bool {
    let two = BigUint::from(2u32);
    if *candidate < two {
        return false;
    }
    if candidate.is_even() {
        return *candidate == two;
    }

    for &small in SMALL_PRIMES.iter() {
        let small = BigUint::from(small);
        if *candidate == small {
            return true;
        }
        if (candidate % &small).is_zero() {
            return false;
        }
    }

    miller_rabin(candidate, rounds, rng)
}

/// Draw a random prime of exactly `bits` bits
///
/// The two most significant bits are forced on so that the product of two such
/// primes has exactly `2 * bits` bits. Returns `None` when no prime turned up
/// within `max_candidates` draws.
pub fn random_prime<R: RngCore + CryptoRng>(
    bits: u64,
    max_candidates: usize,
    rng: &mut R,
) -> Option<BigUint> {
    if bits < 3 {
        return None;
    }

    let top_bits = (BigUint::one() << (bits - 1)) | (BigUint::one() << (bits - 2));

    for _ in 0..max_candidates {
        let candidate = rng.gen_biguint(bits) | &top_bits | BigUint::one();
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return Some(candidate);
        }
    }

    None
}

fn miller_rabin<R: RngCore + CryptoRng>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let n_minus_one = n - &one;

    // n - 1 = d * 2^s with d odd
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }

        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }

        return false;
    }

    true
}
