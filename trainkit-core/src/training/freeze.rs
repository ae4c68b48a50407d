//! Layer freezing ahead of compilation.

use crate::error::FitError;
use crate::training::model::Layer;

/// Mark every layer before the first layer named `first_trainable` as
/// non-trainable and return the names of the layers that were frozen.
///
/// `None` or an empty name leaves every flag untouched. An unknown name is an
/// error; the available layers are logged with their indices first.
pub fn freeze_layers(
    layers: &mut [Layer],
    first_trainable: Option<&str>,
) -> Result<Vec<String>, FitError> {
    let Some(target) = first_trainable.filter(|name| !name.is_empty()) else {
        return Ok(Vec::new());
    };

    let Some(position) = layers.iter().position(|layer| layer.name == target) else {
        tracing::error!(
            layer = target,
            "First trainable layer is not in the model. Did you mean one of these?"
        );
        for (i, layer) in layers.iter().enumerate() {
            tracing::error!("{i} {}", layer.name);
        }
        return Err(FitError::UnknownLayer {
            name: target.to_string(),
            available: layers.iter().map(|l| l.name.clone()).collect(),
        });
    };

    let frozen: Vec<String> = layers[..position]
        .iter_mut()
        .map(|layer| {
            layer.trainable = false;
            layer.name.clone()
        })
        .collect();

    if !frozen.is_empty() {
        tracing::info!(layers = ?frozen, "The following layers do not update weights");
    }
    Ok(frozen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn layers(names: &[&str]) -> Vec<Layer> {
        names.iter().map(|n| Layer::new(*n)).collect()
    }

    fn flags(layers: &[Layer]) -> Vec<bool> {
        layers.iter().map(|l| l.trainable).collect()
    }

    #[test]
    fn test_freeze_up_to_named_layer() {
        let mut model = layers(&["input", "conv_1", "conv_2", "head"]);
        let frozen = freeze_layers(&mut model, Some("conv_2")).unwrap();
        assert_eq!(frozen, vec!["input".to_string(), "conv_1".to_string()]);
        assert_eq!(flags(&model), vec![false, false, true, true]);
    }

    #[test]
    fn test_first_layer_freezes_nothing() {
        let mut model = layers(&["input", "head"]);
        let frozen = freeze_layers(&mut model, Some("input")).unwrap();
        assert!(frozen.is_empty());
        assert_eq!(flags(&model), vec![true, true]);
    }

    #[test]
    fn test_duplicate_names_stop_at_first_occurrence() {
        let mut model = layers(&["a", "block", "b", "block"]);
        freeze_layers(&mut model, Some("block")).unwrap();
        assert_eq!(flags(&model), vec![false, true, true, true]);
    }

    #[test]
    fn test_none_and_empty_leave_flags_unchanged() {
        let mut model = layers(&["a", "b", "c"]);
        model[1].trainable = false;
        let before = model.clone();

        assert!(freeze_layers(&mut model, None).unwrap().is_empty());
        assert_eq!(model, before);
        assert!(freeze_layers(&mut model, Some("")).unwrap().is_empty());
        assert_eq!(model, before);
    }

    #[test]
    fn test_unknown_layer_lists_available() {
        let mut model = layers(&["a", "b"]);
        let err = freeze_layers(&mut model, Some("missing")).unwrap_err();
        match err {
            FitError::UnknownLayer { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(flags(&model), vec![true, true]);
    }

    proptest! {
        #[test]
        fn prop_layers_before_target_are_frozen(count in 1usize..24, pick in 0usize..24) {
            let target = pick % count;
            let names: Vec<String> = (0..count).map(|i| format!("layer_{i}")).collect();
            let mut model: Vec<Layer> = names.iter().map(Layer::new).collect();

            let frozen = freeze_layers(&mut model, Some(&names[target])).unwrap();

            prop_assert_eq!(frozen.len(), target);
            for (i, layer) in model.iter().enumerate() {
                prop_assert_eq!(layer.trainable, i >= target);
            }
        }
    }
}
