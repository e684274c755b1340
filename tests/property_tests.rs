/// Property-based tests using proptest
/// Tests invariants that should hold for all scoring and normalization inputs
use proptest::prelude::*;
use mos_lead_engine::compliance::normalize_phone;
use mos_lead_engine::enrichment::is_valid_email;
use mos_lead_engine::models::PriorityTag;
use mos_lead_engine::scoring::{ScoringEngine, ScoringInput};

fn input(property: Option<f64>, income: Option<f64>, social: Option<f64>) -> ScoringInput {
    ScoringInput {
        property_value: property,
        household_income: income,
        social_quality_score: social,
        job_title: None,
    }
}

fn rank(tag: PriorityTag) -> u8 {
    match tag {
        PriorityTag::Low => 0,
        PriorityTag::Warm => 1,
        PriorityTag::HotLead => 2,
    }
}

// Property: score is always within 0..=100 and the tag matches the thresholds
proptest! {
    #[test]
    fn score_is_bounded_and_tag_consistent(
        property in proptest::option::of(-1e9f64..1e10),
        income in proptest::option::of(-1e7f64..1e8),
        social in proptest::option::of(-100f64..200.0)
    ) {
        let engine = ScoringEngine::default();
        let result = engine.score(&input(property, income, social)).unwrap();

        prop_assert!((0..=100).contains(&result.score));
        let expected = if result.score > 80 {
            PriorityTag::HotLead
        } else if result.score > 60 {
            PriorityTag::Warm
        } else {
            PriorityTag::Low
        };
        prop_assert_eq!(result.priority_tag, expected);
    }

    #[test]
    fn higher_inputs_never_lower_the_score(
        property in 0f64..5e6,
        income in 0f64..5e5,
        social in 0f64..100.0,
        bump in 0f64..1e6
    ) {
        let engine = ScoringEngine::default();
        let low = engine.score(&input(Some(property), Some(income), Some(social))).unwrap();
        let high = engine
            .score(&input(Some(property + bump), Some(income + bump), Some(social + bump)))
            .unwrap();

        prop_assert!(high.score >= low.score);
        prop_assert!(rank(high.priority_tag) >= rank(low.priority_tag));
    }

    #[test]
    fn scoring_is_deterministic(
        property in proptest::option::of(0f64..5e6),
        income in proptest::option::of(0f64..5e5)
    ) {
        let engine = ScoringEngine::default();
        let a = engine.score(&input(property, income, None)).unwrap();
        let b = engine.score(&input(property, income, None)).unwrap();
        prop_assert_eq!(a, b);
    }
}

// Property: normalization never panics and only yields digits
proptest! {
    #[test]
    fn phone_normalization_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn normalized_phones_are_digits_only(phone in "[0-9()+. -]{0,20}") {
        if let Some(national) = normalize_phone(&phone) {
            prop_assert!(national.len() >= 7);
            prop_assert!(national.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
    }
}

#[test]
fn reference_hot_lead_scores_100() {
    let engine = ScoringEngine::default();
    let result = engine
        .score(&input(Some(1_200_000.0), Some(200_000.0), Some(90.0)))
        .unwrap();

    assert_eq!(result.score, 100);
    assert_eq!(result.priority_tag, PriorityTag::HotLead);
    assert!(result.dossier.contains("Immediate call"));
}

#[test]
fn empty_inputs_score_base() {
    let result = ScoringEngine::default()
        .score(&input(None, None, None))
        .unwrap();
    assert_eq!(result.score, 50);
    assert_eq!(result.priority_tag, PriorityTag::Low);
}

#[test]
fn non_finite_inputs_are_rejected() {
    let engine = ScoringEngine::default();
    assert!(engine.score(&input(None, Some(f64::NAN), None)).is_err());
    assert!(engine.score(&input(Some(f64::INFINITY), None, None)).is_err());
}
