//! Property tests for `ControlRowClassifier`

use cdc_bootstrap_core::control::{ControlRowClassifier, RowClass};
use cdc_bootstrap_testing::properties::arb_row;
use proptest::prelude::*;

proptest! {
    #[test]
    fn start_and_complete_rows_are_control_rows(row in arb_row("maxwell")) {
        let classifier = ControlRowClassifier::new("maxwell");

        if classifier.is_start_bootstrap_row(&row) || classifier.is_complete_bootstrap_row(&row) {
            prop_assert!(classifier.is_bootstrap_row(&row));
        }
    }

    #[test]
    fn a_row_is_never_both_start_and_complete(row in arb_row("maxwell")) {
        let classifier = ControlRowClassifier::new("maxwell");

        prop_assert!(
            !(classifier.is_start_bootstrap_row(&row) && classifier.is_complete_bootstrap_row(&row))
        );
    }

    #[test]
    fn rows_outside_the_control_database_are_never_control_rows(row in arb_row("shop")) {
        let classifier = ControlRowClassifier::new("maxwell");

        prop_assume!(row.database() != "maxwell");
        prop_assert!(!classifier.is_bootstrap_row(&row));
        prop_assert_eq!(classifier.classify(&row), RowClass::NotBootstrap);
    }

    #[test]
    fn classify_agrees_with_the_predicates(row in arb_row("maxwell")) {
        let classifier = ControlRowClassifier::new("maxwell");

        let expected = if !classifier.is_bootstrap_row(&row) {
            RowClass::NotBootstrap
        } else if classifier.is_start_bootstrap_row(&row) {
            RowClass::Start
        } else if classifier.is_complete_bootstrap_row(&row) {
            RowClass::Complete
        } else {
            RowClass::InProgress
        };
        prop_assert_eq!(classifier.classify(&row), expected);
    }
}
