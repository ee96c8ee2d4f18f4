//! Integration tests for sysml-serializer using the in-memory vehicle fixtures.

use std::collections::HashSet;
use std::sync::Arc;

use sysml_model::{MetaClass, MetaFeature, Model, ObjectId, Value};
use sysml_serializer::test_fixtures::{
    linear_automaton, reparse, sample_grammar, sample_grammar_description, two_cycle_automaton,
    vehicle_model, ModelBuilder,
};
use sysml_serializer::{
    compute_bounds, Bound, ConstraintProvider, CrossReferenceResolver, GrammarConstraints,
    GrammarDescription, ModelSnapshot, RecordingAcceptor, RuleAutomaton, SequenceEvent, Sequencer,
    SerializerConfig, SerializerError, StateId, SysmlTransientPolicy, TransientPolicy,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sequence `root` with the sample grammar's bounds and return the recorded events.
fn sequence(
    model: &Model,
    root: ObjectId,
    config: SerializerConfig,
) -> anyhow::Result<Vec<SequenceEvent>> {
    let constraints = ConstraintProvider::global().constraints(&sample_grammar()?)?;
    let sequencer = Sequencer::from_config(config).with_constraints(constraints);
    let mut acceptor = RecordingAcceptor::new();
    sequencer.sequence(model, root, &mut acceptor)?;
    Ok(acceptor.into_events())
}

// ============================================================================
// Bound Analysis
// ============================================================================

#[test]
fn bounds_two_cycle_is_unbounded() {
    let bounds = compute_bounds(&two_cycle_automaton(), 1).unwrap();
    assert_eq!(bounds.get(0), Some(Bound::Unbounded));
}

#[test]
fn bounds_linear_path_is_one() {
    let bounds = compute_bounds(&linear_automaton(), 1).unwrap();
    assert_eq!(bounds.get(0), Some(Bound::Finite(1)));
}

#[test]
fn bounds_self_loop_only_affects_its_own_feature() {
    // s0 -> s1[0] -> s2[1] -> s2
    let mut automaton = RuleAutomaton::new("SelfLoop");
    let tagged = automaton.add_state(Some(0));
    let looping = automaton.add_state(Some(1));
    let automaton = automaton.chain(&[StateId(0), tagged, looping, looping]);

    let bounds = compute_bounds(&automaton, 3).unwrap();
    assert_eq!(bounds.get(0), Some(Bound::Finite(1)));
    assert_eq!(bounds.get(1), Some(Bound::Unbounded));
    assert_eq!(bounds.get(2), Some(Bound::ZERO));
}

/// Largest number of times each feature is assigned on any path of at most `max_len` states.
fn observed_counts(automaton: &RuleAutomaton, feature_count: usize, max_len: usize) -> Vec<u32> {
    let mut observed = vec![0; feature_count];
    let mut stack = vec![(automaton.start(), vec![0u32; feature_count], 1usize)];
    while let Some((state, mut counts, len)) = stack.pop() {
        let Some(current) = automaton.state(state) else {
            continue;
        };
        if let Some(feature) = current.feature {
            counts[feature] += 1;
        }
        for (seen, count) in observed.iter_mut().zip(&counts) {
            *seen = (*seen).max(*count);
        }
        if len < max_len {
            for follower in &current.followers {
                stack.push((*follower, counts.clone(), len + 1));
            }
        }
    }
    observed
}

#[test]
fn bounds_are_sound_for_sample_grammar() {
    let grammar = sample_grammar().unwrap();
    for rule in grammar.rules() {
        for class in &rule.classes {
            let feature_count = class.feature_count();
            let bounds = compute_bounds(&rule.automaton, feature_count).unwrap();
            let max_len = 3 * rule.automaton.state_count();
            let observed = observed_counts(&rule.automaton, feature_count, max_len);

            for (feature, count) in observed.into_iter().enumerate() {
                match bounds.get(feature) {
                    Some(Bound::Finite(bound)) => assert_eq!(
                        count, bound,
                        "rule {} class {class}: feature {feature} bound is not the longest path",
                        rule.name
                    ),
                    Some(Bound::Unbounded) => assert!(
                        count > 1,
                        "rule {}: unbounded feature {feature} never repeats",
                        rule.name
                    ),
                    None => panic!("rule {}: no bound for feature {feature}", rule.name),
                }
            }
        }
    }
}

// ============================================================================
// Constraint Cache
// ============================================================================

#[test]
fn constraint_cache_shared_across_threads() {
    init_tracing();
    let grammar = sample_grammar().unwrap();
    let provider = ConstraintProvider::global();

    let results: Vec<Arc<GrammarConstraints>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| provider.constraints(&grammar).unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert!(provider.is_cached(grammar.id()));
    assert_eq!(results[0].grammar(), grammar.id());
}

#[test]
fn constraint_bounds_of_sample_grammar() {
    let constraints = GrammarConstraints::analyse(&sample_grammar().unwrap()).unwrap();

    let feature = constraints.get("Feature", MetaClass::Feature).unwrap();
    assert_eq!(feature.bound(MetaFeature::OwnedRelationship), Some(Bound::Finite(2)));
    assert_eq!(feature.bound(MetaFeature::DeclaredName), Some(Bound::Finite(1)));

    let package = constraints.get("Package", MetaClass::Package).unwrap();
    assert_eq!(package.unbounded_features(), vec![MetaFeature::OwnedRelationship]);

    let membership = constraints
        .get("OwningMembership", MetaClass::FeatureMembership)
        .unwrap();
    assert_eq!(membership.name, "OwningMembership_FeatureMembership");
}

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn round_trip_vehicle_model() -> anyhow::Result<()> {
    init_tracing();
    let vehicles = vehicle_model()?;
    let config = SerializerConfig::default();
    let ignored = config.ignored_snapshot_features.clone();
    let events = sequence(&vehicles.model, vehicles.root, config)?;

    let (parsed, parsed_root) = reparse(&events, "::")?;
    let original = ModelSnapshot::capture_with(&vehicles.model, vehicles.root, &ignored)?;
    let reparsed = ModelSnapshot::capture_with(&parsed, parsed_root, &ignored)?;

    assert_eq!(original.len(), vehicles.model.len());
    assert_eq!(original.compare(&reparsed), None);
    Ok(())
}

#[test]
fn round_trip_with_custom_separator() -> anyhow::Result<()> {
    let vehicles = vehicle_model()?;
    let config = SerializerConfig::from_json(r#"{"name_separator": "."}"#)?;
    let events = sequence(&vehicles.model, vehicles.root, config)?;

    let tokens: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            SequenceEvent::Reference { token, .. } => Some(token.as_str()),
            _ => None,
        })
        .collect();
    assert!(tokens.contains(&"Vehicles.Vehicle.engine"));

    let (parsed, parsed_root) = reparse(&events, ".")?;
    let original = ModelSnapshot::capture(&vehicles.model, vehicles.root)?;
    assert!(original.matches(&ModelSnapshot::capture(&parsed, parsed_root)?));
    Ok(())
}

#[test]
fn round_trip_quotes_names_containing_the_separator() -> anyhow::Result<()> {
    let mut builder = ModelBuilder::new();
    let root = builder.root();
    let package = builder.package(root, "Vehicles");
    let engine = builder.part_def(package, "Engine::Mk2");
    let car = builder.part_def(package, "Car");
    let car_engine = builder.part(car, "engine");
    builder.typed_by(car_engine, engine);
    let model = builder.build()?;

    let events = sequence(&model, root, SerializerConfig::default())?;
    assert!(events.iter().any(|event| matches!(
        event,
        SequenceEvent::Reference { token, .. } if token == "Vehicles::'Engine::Mk2'"
    )));

    let (parsed, parsed_root) = reparse(&events, "::")?;
    let original = ModelSnapshot::capture(&model, root)?;
    assert!(original.matches(&ModelSnapshot::capture(&parsed, parsed_root)?));
    Ok(())
}

#[test]
fn sequence_prints_qualified_reference_tokens() -> anyhow::Result<()> {
    let vehicles = vehicle_model()?;
    let constraints = ConstraintProvider::global().constraints(&sample_grammar()?)?;
    let sequencer =
        Sequencer::from_config(SerializerConfig::default()).with_constraints(constraints);
    let mut acceptor = RecordingAcceptor::new();
    let stats = sequencer.sequence(&vehicles.model, vehicles.root, &mut acceptor)?;

    assert_eq!(stats.objects, vehicles.model.len());
    assert_eq!(stats.references, 6);
    assert_eq!(
        acceptor.tokens(),
        vec![
            "Vehicles::Engine",
            "Vehicles::Wheel",
            "Vehicles::Vehicle",
            "Vehicles::Vehicle::engine",
            "Vehicles::Vehicle::wheels",
            "Vehicles::Wheel",
        ]
    );

    // Derived back-pointers and element ids never reach the acceptor.
    assert!(!acceptor.events().iter().any(|event| matches!(
        event,
        SequenceEvent::Reference {
            feature: MetaFeature::TypedFeature
                | MetaFeature::RedefiningFeature
                | MetaFeature::SubsettingFeature,
            ..
        } | SequenceEvent::Attribute {
            feature: MetaFeature::ElementId,
            ..
        }
    )));
    Ok(())
}

#[test]
fn round_trip_detects_renamed_target() -> anyhow::Result<()> {
    let vehicles = vehicle_model()?;
    let events = sequence(&vehicles.model, vehicles.root, SerializerConfig::default())?;
    let renamed: Vec<_> = events
        .into_iter()
        .map(|event| match event {
            SequenceEvent::Attribute {
                object,
                feature: MetaFeature::DeclaredName,
                value: Value::Text(name),
                many,
            } if name == "spare" => SequenceEvent::Attribute {
                object,
                feature: MetaFeature::DeclaredName,
                value: Value::from("reserve"),
                many,
            },
            other => other,
        })
        .collect();

    let (parsed, parsed_root) = reparse(&renamed, "::")?;
    let original = ModelSnapshot::capture(&vehicles.model, vehicles.root)?;
    assert!(!original.matches(&ModelSnapshot::capture(&parsed, parsed_root)?));
    Ok(())
}

#[test]
fn bound_violation_aborts_pass() -> anyhow::Result<()> {
    let mut builder = ModelBuilder::new();
    let package = builder.package(builder.root(), "Vehicles");
    let engine = builder.part_def(package, "Engine");
    let part = builder.part(package, "engine");
    builder.typed_by(part, engine);
    builder.typed_by(part, engine);
    builder.typed_by(part, engine);
    let root = builder.root();
    let model = builder.build()?;

    let error = sequence(&model, root, SerializerConfig::default()).unwrap_err();
    match error.downcast_ref::<SerializerError>() {
        Some(SerializerError::BoundExceeded {
            object,
            feature,
            constraint,
            count,
            bound,
        }) => {
            assert_eq!(*object, part);
            assert_eq!(*feature, MetaFeature::OwnedRelationship);
            assert_eq!(constraint, "Feature");
            assert_eq!((*count, *bound), (3, 2));
        }
        other => panic!("expected a bound violation, got {other:?}"),
    }
    Ok(())
}

// ============================================================================
// Cross-Reference Resolution
// ============================================================================

#[test]
fn resolver_tokens_are_unique_per_target() -> anyhow::Result<()> {
    let vehicles = vehicle_model()?;
    let model = &vehicles.model;
    let subsetting = model
        .owned_relationships(vehicles.car_spare)
        .into_iter()
        .find(|relationship| model.is_a(*relationship, MetaClass::Subsetting))
        .ok_or_else(|| anyhow::anyhow!("spare has no subsetting"))?;

    let resolver: CrossReferenceResolver = CrossReferenceResolver::default();
    let targets = [
        vehicles.package,
        vehicles.engine,
        vehicles.wheel,
        vehicles.vehicle,
        vehicles.car,
        vehicles.vehicle_engine,
        vehicles.vehicle_wheels,
        vehicles.car_engine,
        vehicles.car_spare,
    ];
    let mut tokens = HashSet::new();
    for target in targets {
        let value = Value::Object(target);
        let token =
            resolver.resolve(model, subsetting, MetaFeature::SubsettedFeature, 0, &value)?;
        assert!(tokens.insert(token.clone()), "token {token} designates more than one target");
    }
    assert!(tokens.contains("Vehicles::Car::engine"));
    Ok(())
}

// ============================================================================
// Transience
// ============================================================================

#[test]
fn transience_is_independent_of_call_order() -> anyhow::Result<()> {
    let vehicles = vehicle_model()?;
    let model = &vehicles.model;
    let policy: SysmlTransientPolicy = SysmlTransientPolicy::default();

    let mut queries = Vec::new();
    for object in model.containment_tree(vehicles.root) {
        let Some(class) = model.class_of(object) else {
            continue;
        };
        for feature in class.all_features() {
            queries.push((object, feature, None));
            for index in 0..model.value_count(object, feature) {
                queries.push((object, feature, Some(index)));
            }
        }
    }

    let forward: Vec<bool> = queries
        .iter()
        .map(|(object, feature, index)| policy.is_transient(model, *object, *feature, *index))
        .collect();
    let mut backward: Vec<bool> = queries
        .iter()
        .rev()
        .map(|(object, feature, index)| policy.is_transient(model, *object, *feature, *index))
        .collect();
    backward.reverse();

    assert_eq!(forward, backward);
    Ok(())
}

// ============================================================================
// Configuration Files
// ============================================================================

#[test]
fn grammar_description_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("grammar.json");
    std::fs::write(&path, sample_grammar_description().to_json()?)?;

    let description = GrammarDescription::load(&path)?;
    assert_eq!(description, sample_grammar_description());

    let grammar = description.build()?;
    let constraints = ConstraintProvider::new().constraints(&grammar)?;
    let classifier = constraints.get("Classifier", MetaClass::Classifier).unwrap();
    assert_eq!(classifier.bound(MetaFeature::IsAbstract), Some(Bound::Finite(1)));
    assert!(classifier.is_many(MetaFeature::OwnedRelationship));
    Ok(())
}

#[test]
fn serializer_config_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("serializer.json");
    std::fs::write(
        &path,
        r#"{"reuse_source_tokens": false, "ignored_snapshot_features": ["ElementId"]}"#,
    )?;

    let config = SerializerConfig::load(&path)?;
    assert!(!config.reuse_source_tokens);
    assert_eq!(config.ignored_snapshot_features, vec![MetaFeature::ElementId]);
    assert_eq!(config.name_separator, "::");

    std::fs::write(&path, "{ not json")?;
    assert!(matches!(SerializerConfig::load(&path), Err(SerializerError::Config(_))));
    assert!(matches!(
        SerializerConfig::load(dir.path().join("missing.json")),
        Err(SerializerError::Io(_))
    ));
    Ok(())
}
