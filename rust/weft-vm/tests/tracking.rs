use proptest::prelude::*;
use weft_vm::{Reference, Revisions, Value};

fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        _ => f64::NAN,
    }
}

fn sum_of(cells: &[Reference]) -> Reference {
    let cells = cells.to_vec();
    Reference::formula(move |revs| {
        let total = cells.iter().map(|c| c.value(revs).map(|v| number(&v)).unwrap_or(f64::NAN)).sum();
        Value::Number(total)
    })
}

proptest! {
    #[test]
    fn revisions_only_advance_on_real_writes(writes in prop::collection::vec((0usize..4, 0i32..3), 1..40)) {
        let revs = Revisions::new();
        let cells: Vec<Reference> = (0..4).map(|_| Reference::cell(&revs, Value::Number(0.0))).collect();
        let mut shadow = [0i32; 4];
        for (index, value) in writes {
            let before = revs.current();
            let changed = cells[index].set(&revs, Value::Number(f64::from(value)));
            prop_assert_eq!(changed, shadow[index] != value);
            if changed {
                prop_assert!(revs.current() > before);
            } else {
                prop_assert_eq!(revs.current(), before);
            }
            shadow[index] = value;
        }
    }

    #[test]
    fn formulas_are_invalidated_exactly_by_their_inputs(writes in prop::collection::vec((0usize..4, 0i32..3), 1..40)) {
        let revs = Revisions::new();
        let cells: Vec<Reference> = (0..4).map(|_| Reference::cell(&revs, Value::Number(0.0))).collect();
        // Reads the first three cells only.
        let formula = sum_of(&cells[..3]);
        let mut shadow = [0i32; 4];
        formula.value(&revs).unwrap();
        let mut snapshot = revs.value_for_tag(&formula.tag(&revs));

        for (index, value) in writes {
            let changed = cells[index].set(&revs, Value::Number(f64::from(value)));
            shadow[index] = value;
            let valid = revs.validate_tag(&formula.tag(&revs), snapshot);
            prop_assert_eq!(valid, !(changed && index < 3));

            let expected: i32 = shadow[..3].iter().sum();
            prop_assert_eq!(formula.value(&revs).unwrap(), Value::Number(f64::from(expected)));
            snapshot = revs.value_for_tag(&formula.tag(&revs));
        }
    }
}

#[test]
fn untracked_reads_do_not_subscribe() {
    let revs = Revisions::new();
    let watched = Reference::cell(&revs, Value::Number(1.0));
    let ignored = Reference::cell(&revs, Value::Number(2.0));
    let formula = {
        let (watched, ignored) = (watched.clone(), ignored.clone());
        Reference::formula(move |revs| {
            let peek = revs.untrack(|| ignored.value(revs)).map(|v| number(&v)).unwrap_or(0.0);
            Value::Number(watched.value(revs).map(|v| number(&v)).unwrap_or(0.0) + peek)
        })
    };
    assert_eq!(formula.value(&revs).unwrap(), Value::Number(3.0));
    let snapshot = revs.value_for_tag(&formula.tag(&revs));
    ignored.set(&revs, Value::Number(5.0));
    assert!(revs.validate_tag(&formula.tag(&revs), snapshot));
    watched.set(&revs, Value::Number(0.0));
    assert!(!revs.validate_tag(&formula.tag(&revs), snapshot));
    assert_eq!(formula.value(&revs).unwrap(), Value::Number(5.0));
}
