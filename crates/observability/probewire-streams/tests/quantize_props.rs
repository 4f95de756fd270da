use probewire_streams::{Linear, Pow2, Quantizer, Scale};
use proptest::prelude::*;

proptest! {
    #[test]
    fn pow2_bucket_brackets_value(v in 1.0f64..1e12) {
        let scale = Pow2;
        let index = scale.value_index(v).unwrap();
        prop_assert!(scale.index_value(index) <= v);
        prop_assert!(v < scale.index_value(index + 1));
    }

    #[test]
    fn pow2_fractions_share_the_zero_bucket(v in -0.999_999f64..0.999_999) {
        let scale = Pow2;
        prop_assert_eq!(scale.value_index(v), Some(0));
        prop_assert!(scale.index_value(-1) < v && v < scale.index_value(1));
    }

    #[test]
    fn pow2_negative_mirrors_positive(v in 1.0f64..1e12) {
        let scale = Pow2;
        prop_assert_eq!(scale.value_index(-v), scale.value_index(v).map(|i| -i));
    }

    #[test]
    fn quantizer_has_no_gaps(values in prop::collection::vec(-1e6f64..1e6, 1..64)) {
        let mut q = Quantizer::new(Pow2);
        for v in &values {
            q.add(*v);
        }
        let histogram = q.histogram();
        let (min, max) = (histogram.min_index.unwrap(), histogram.max_index.unwrap());
        prop_assert_eq!(histogram.buckets.len() as i64, max - min + 1);
        for (offset, bucket) in histogram.buckets.iter().enumerate() {
            prop_assert_eq!(bucket.index, min + offset as i64);
        }
        prop_assert_eq!(q.total(), values.len() as u64);
        let largest = histogram.buckets.iter().map(|b| b.count).max().unwrap_or(0);
        prop_assert_eq!(q.max_count(), largest);
    }

    #[test]
    fn linear_ignores_out_of_range(v in -100.0f64..200.0) {
        let scale = Linear::new(0.0, 100.0, 10.0).unwrap();
        let index = scale.value_index(v);
        prop_assert_eq!(index.is_some(), (0.0..=100.0).contains(&v));
        if let Some(i) = index {
            prop_assert!(scale.index_value(i) >= v);
            prop_assert!(scale.index_value(i) - v < 10.0);
        }
    }
}
