//! Property tests for period arithmetic.

use proptest::prelude::*;
use proptest::test_runner::Config;
use surv_core::{Period, PeriodBounds};

fn bounds() -> PeriodBounds {
    PeriodBounds::new(2014, 2030)
}

fn any_period() -> impl Strategy<Value = Period> {
    (2014_i32..=2030, 1_u32..=12).prop_map(|(y, m)| bounds().period(y, m).unwrap())
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    #[test]
    fn following_then_previous_is_identity(p in any_period()) {
        prop_assume!(p != bounds().last());
        let next = p.following(&bounds()).unwrap();
        prop_assert_eq!(next.previous(&bounds()).unwrap(), p);
        prop_assert!(p < next);
    }

    #[test]
    fn all_from_length_matches_month_distance(a in any_period(), b in any_period()) {
        let (from, to) = if a <= b { (a, b) } else { (b, a) };
        let periods = bounds().all_from(from, to).unwrap();

        prop_assert_eq!(periods.len() as i64, from.months_until(&to) + 1);
        prop_assert_eq!(periods.first(), Some(&from));
        prop_assert_eq!(periods.last(), Some(&to));
        for pair in periods.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn identifiers_parse_back(p in any_period()) {
        prop_assert_eq!(bounds().parse(&p.strid()).unwrap(), p);
        prop_assert_eq!(bounds().parse(&p.compact_id()).unwrap(), p);
    }

    #[test]
    fn ordering_agrees_with_month_distance(a in any_period(), b in any_period()) {
        let distance = a.months_until(&b);
        prop_assert_eq!(a < b, distance > 0);
        prop_assert_eq!(a == b, distance == 0);
    }
}
