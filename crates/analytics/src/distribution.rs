use core_types::{Distribution, DistributionBucket, Window};
use rust_decimal::Decimal;

/// Histograms percentiles into `bucket_count` equal-width buckets over [0, 100].
///
/// Bucket bounds are `i·w` rounded to two places, with `w = 100 / bucket_count`.
/// Bucket `i` covers `[bound(i), bound(i+1))` exactly as its label reads and
/// the last bucket also takes 100. `None` values are not bucketed, they are
/// counted in `excluded` instead.
pub fn build_distribution<I>(window: Window, bucket_count: usize, percentiles: I) -> Distribution
where
    I: IntoIterator<Item = Option<Decimal>>,
{
    let bucket_count = bucket_count.max(1);
    let bounds = bounds(bucket_count);
    let mut counts = vec![0usize; bucket_count];
    let mut excluded = 0;

    for percentile in percentiles {
        match percentile {
            Some(p) => counts[bucket_of(p, &bounds)] += 1,
            None => excluded += 1,
        }
    }

    let buckets = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| DistributionBucket { bucket: format!("{}-{}", bounds[i], bounds[i + 1]), count })
        .collect();

    Distribution { metric: window, buckets, excluded }
}

/// The `bucket_count + 1` edges, from 0 to 100.
fn bounds(bucket_count: usize) -> Vec<Decimal> {
    let width = Decimal::ONE_HUNDRED / Decimal::from(bucket_count);
    (0..=bucket_count)
        .map(|i| {
            if i == bucket_count {
                Decimal::ONE_HUNDRED
            } else {
                (width * Decimal::from(i)).round_dp(2).normalize()
            }
        })
        .collect()
}

fn bucket_of(percentile: Decimal, bounds: &[Decimal]) -> usize {
    // Inner edges only; anything below the first lands in bucket 0.
    let inner = &bounds[1..bounds.len() - 1];
    inner.partition_point(|edge| *edge <= percentile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ten_buckets_of_width_ten() {
        let values = [Some(dec!(0)), Some(dec!(9.99)), Some(dec!(10)), Some(dec!(55)), Some(dec!(100)), None];
        let distribution = build_distribution(Window::SinceInception, 10, values);

        assert_eq!(distribution.buckets.len(), 10);
        assert_eq!(distribution.buckets[0].bucket, "0-10");
        assert_eq!(distribution.buckets[9].bucket, "90-100");
        assert_eq!(distribution.buckets[0].count, 2);
        assert_eq!(distribution.buckets[1].count, 1);
        assert_eq!(distribution.buckets[5].count, 1);
        assert_eq!(distribution.buckets[9].count, 1);
        assert_eq!(distribution.excluded, 1);
    }

    #[test]
    fn uneven_widths_still_end_at_one_hundred() {
        let distribution = build_distribution(Window::ThreeYear, 3, [Some(dec!(66.67))]);
        let labels: Vec<&str> = distribution.buckets.iter().map(|b| b.bucket.as_str()).collect();
        assert_eq!(labels, vec!["0-33.33", "33.33-66.67", "66.67-100"]);
        assert_eq!(distribution.buckets[2].count, 1);
        assert_eq!(distribution.metric, Window::ThreeYear);
    }

    #[test]
    fn values_on_rounded_edges_follow_their_labels() {
        let values = [Some(dec!(33.33)), Some(dec!(33.329)), Some(dec!(66.66)), Some(dec!(-1))];
        let distribution = build_distribution(Window::SinceInception, 3, values);
        let counts: Vec<usize> = distribution.buckets.iter().map(|b| b.count).collect();
        // 33.33 opens "33.33-66.67"; 33.329 and -1 stay in "0-33.33".
        assert_eq!(counts, vec![2, 2, 0]);
    }

    #[test]
    fn empty_input_yields_zeroed_buckets() {
        let distribution = build_distribution(Window::SinceInception, 5, std::iter::empty());
        assert!(distribution.buckets.iter().all(|b| b.count == 0));
        assert_eq!(distribution.excluded, 0);
    }

    proptest! {
        #[test]
        fn counts_partition_the_non_null_values(
            raw in prop::collection::vec(prop::option::of(0i64..=10_000), 0..100),
            bucket_count in 1usize..=20,
        ) {
            let values: Vec<Option<Decimal>> =
                raw.iter().map(|v| v.map(|c| Decimal::new(c, 2))).collect();
            let non_null = values.iter().filter(|v| v.is_some()).count();

            let distribution = build_distribution(Window::SinceInception, bucket_count, values.clone());

            prop_assert_eq!(distribution.buckets.len(), bucket_count);
            let total: usize = distribution.buckets.iter().map(|b| b.count).sum();
            prop_assert_eq!(total, non_null);
            prop_assert_eq!(distribution.excluded, values.len() - non_null);
        }
    }
}
