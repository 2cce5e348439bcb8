//! Property-based tests for option overrides, resume discovery and
//! experiment directory versioning.

use proptest::prelude::*;
use serde_yaml::Value;

use srtrain_core::experiment::versioned_root;
use srtrain_core::options::{apply_force_yml, postprocess_yml_value};
use srtrain_core::resume::latest_state_file;

fn base_options() -> Value {
    serde_yaml::from_str(
        "train:\n  total_iter: 10\n  optim_g:\n    lr: 0.1\nlogger:\n  print_freq: 1\n",
    )
    .unwrap()
}

// --- Override properties ---

proptest! {
    #[test]
    fn integer_override_is_assigned(v in -100_000i64..100_000) {
        let mut opts = base_options();
        apply_force_yml(&mut opts, &[format!("train:total_iter={v}")]).unwrap();
        prop_assert_eq!(&opts["train"]["total_iter"], &Value::from(v));
    }

    #[test]
    fn nested_override_matches_postprocessed_value(word in "[a-zA-Z][a-zA-Z0-9_]{0,12}") {
        let mut opts = base_options();
        apply_force_yml(&mut opts, &[format!("train:optim_g:type={word}")]).unwrap();
        prop_assert_eq!(&opts["train"]["optim_g"]["type"], &postprocess_yml_value(&word));
    }

    #[test]
    fn bool_override_round_trips(b in any::<bool>()) {
        let mut opts = base_options();
        apply_force_yml(&mut opts, &[format!("logger:use_tb_logger={b}")]).unwrap();
        prop_assert_eq!(&opts["logger"]["use_tb_logger"], &Value::Bool(b));
    }

    #[test]
    fn override_into_missing_parent_fails(section in "[a-z]{3,8}") {
        prop_assume!(section != "train" && section != "logger");
        let mut opts = base_options();
        let before = opts.clone();
        let result = apply_force_yml(&mut opts, &[format!("{section}:val_freq=5")]);
        prop_assert!(result.is_err());
        prop_assert_eq!(opts, before);
    }
}

// --- Resume locator properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn latest_state_has_largest_prefix(
        iters in prop::collection::btree_set(1u64..1_000_000, 1..20)
    ) {
        let dir = tempfile::tempdir().unwrap();
        for it in &iters {
            std::fs::write(dir.path().join(format!("{it}.state")), "{}").unwrap();
        }
        std::fs::write(dir.path().join("latest.state"), "{}").unwrap();

        let max = *iters.iter().max().unwrap();
        let found = latest_state_file(dir.path()).unwrap();
        prop_assert_eq!(found, dir.path().join(format!("{max}.state")));
    }
}

// --- Experiment directory versioning ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn versioned_root_takes_next_free_suffix(existing in 0usize..6) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run1");
        if existing > 0 {
            std::fs::create_dir(&base).unwrap();
            for n in 1..existing {
                std::fs::create_dir(dir.path().join(format!("run1_{n}"))).unwrap();
            }
        }
        let expected = if existing == 0 {
            base.clone()
        } else {
            dir.path().join(format!("run1_{existing}"))
        };
        prop_assert_eq!(versioned_root(&base), expected);
    }
}
