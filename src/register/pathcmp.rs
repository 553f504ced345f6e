//! The register's path comparator: `/` sorts lower than any byte ≥ space,
//! byte-wise otherwise, end-of-string lower than any byte.

use std::cmp::Ordering;

/// Compare two paths under the register's total order.
#[must_use]
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut i = 0usize;
    loop {
        match (a.get(i), b.get(i)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&x), Some(&y)) => {
                if x == b'/' {
                    if y == b'/' {
                        i += 1;
                        continue;
                    }
                    return if y < b' ' { Ordering::Greater } else { Ordering::Less };
                }
                if y == b'/' {
                    return if x < b' ' { Ordering::Less } else { Ordering::Greater };
                }
                match x.cmp(&y) {
                    Ordering::Equal => i += 1,
                    other => return other,
                }
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn antisymmetric(a in ".*", b in ".*") {
            prop_assert_eq!(compare_paths(&a, &b), compare_paths(&b, &a).reverse());
        }

        #[test]
        fn equal_only_for_identical_strings(a in ".*", b in ".*") {
            prop_assert_eq!(compare_paths(&a, &b) == Ordering::Equal, a == b);
        }

        #[test]
        fn reflexive(a in ".*") {
            prop_assert_eq!(compare_paths(&a, &a), Ordering::Equal);
        }
    }
}
