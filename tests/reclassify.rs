//! Re-classification end to end: manual tags are never lost, AI tags are
//! refreshed, and classifier or persistence failures change nothing.

mod common;

use common::{alice, quiet_config, session, ScriptedPersistence};
use std::collections::HashMap;
use std::sync::Arc;
use tagkeep::{
    Candidate, ClassifierError, EngineEvent, MemoryPersistence, MockClassifier, Persistence,
    RollbackOutcome, Source, TagId, TagkeepError, TagkeepConfig,
};

fn by_tag(assignments: Vec<tagkeep::Assignment>) -> HashMap<TagId, (f64, Source)> {
    assignments
        .into_iter()
        .map(|a| (a.tag_id, (a.confidence, a.source)))
        .collect()
}

// === Scenario: re-classify keeps manual tags and refreshes AI tags ===

#[tokio::test]
async fn text_a_keeps_manual_tag2_and_takes_fresh_ai_tags() {
    let persistence = Arc::new(MemoryPersistence::new());
    let user = alice();
    let tag1 = persistence.create_tag(&user, "Tag1").await.unwrap();
    let tag2 = persistence.create_tag(&user, "Tag2").await.unwrap();
    let tag3 = persistence.create_tag(&user, "Tag3").await.unwrap();
    let text = persistence.create_text(&user, "A", None).await.unwrap();

    let classifier = MockClassifier::returning(vec![
        Candidate::new(tag1.id.clone(), "Tag1", 0.6),
        Candidate::new(tag2.id.clone(), "Tag2", 0.8),
        Candidate::new(tag3.id.clone(), "Tag3", 0.4),
    ])
    .then(Ok(vec![Candidate::new(tag1.id.clone(), "Tag1", 0.9)]));
    let api = session(persistence.clone(), Arc::new(classifier), &quiet_config()).await;

    // Initial classification: {(Tag1, 0.9, ai)}
    api.reclassify(&text.id).await.unwrap();
    let initial = by_tag(api.assignments(&text.id));
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[&tag1.id], (0.9, Source::Ai));

    // The user asserts Tag2
    api.add_manual_tag(&text.id, &tag2.id).await.unwrap();

    // The classifier now proposes all three; Tag2 stays manual
    api.reclassify(&text.id).await.unwrap();
    let after = by_tag(api.assignments(&text.id));
    assert_eq!(after.len(), 3);
    assert_eq!(after[&tag1.id], (0.6, Source::Ai));
    assert_eq!(after[&tag2.id], (1.0, Source::Manual));
    assert_eq!(after[&tag3.id], (0.4, Source::Ai));

    // The source of record agrees with the store
    let stored = by_tag(persistence.list_assignments(&user, &text.id).await.unwrap());
    assert_eq!(stored, after);
}

#[tokio::test]
async fn manual_conversion_survives_empty_classification() {
    let persistence = Arc::new(MemoryPersistence::new());
    let user = alice();
    let work = persistence.create_tag(&user, "work").await.unwrap();
    let text = persistence.create_text(&user, "memo", None).await.unwrap();

    let classifier = MockClassifier::returning(vec![])
        .then(Ok(vec![Candidate::new(work.id.clone(), "work", 0.3)]));
    let api = session(persistence.clone(), Arc::new(classifier), &quiet_config()).await;

    api.reclassify(&text.id).await.unwrap();
    assert_eq!(api.assignments(&text.id)[0].source, Source::Ai);

    // Converting in place keeps a single row for the pair
    api.add_manual_tag(&text.id, &work.id).await.unwrap();
    let converted = api.assignments(&text.id);
    assert_eq!(converted.len(), 1);
    assert!(converted[0].is_manual());
    assert_eq!(converted[0].confidence, 1.0);

    api.reclassify(&text.id).await.unwrap();
    let kept = api.assignments(&text.id);
    assert_eq!(kept.len(), 1);
    assert!(kept[0].is_manual());
}

// === Scenario: failures leave assignments untouched ===

#[tokio::test]
async fn classifier_outage_changes_nothing_and_reports_once() {
    let persistence = Arc::new(ScriptedPersistence::new());
    let user = alice();
    let work = persistence.create_tag(&user, "work").await.unwrap();
    let text = persistence.create_text(&user, "memo", None).await.unwrap();
    persistence
        .upsert_assignment(&user, &tagkeep::Assignment::ai(text.id.clone(), work.id.clone(), 0.5).unwrap())
        .await
        .unwrap();

    let classifier = Arc::new(MockClassifier::failing(ClassifierError::Unavailable(
        "down".into(),
    )));
    let api = session(persistence.clone(), classifier.clone(), &quiet_config()).await;
    let before = api.assignments(&text.id);
    let writes = persistence.writes();
    let mut events = api.subscribe();

    let err = api.reclassify(&text.id).await.unwrap_err();
    assert!(matches!(err, TagkeepError::Classifier(_)));
    assert_eq!(api.assignments(&text.id), before);
    assert_eq!(persistence.writes(), writes);
    assert_eq!(classifier.calls(), 1);

    match events.try_recv().unwrap() {
        EngineEvent::ClassifierFailed { text_id, .. } => assert_eq!(text_id, text.id),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn persistence_failure_rolls_reclassification_back() {
    let persistence = Arc::new(ScriptedPersistence::new());
    let user = alice();
    let work = persistence.create_tag(&user, "work").await.unwrap();
    let home = persistence.create_tag(&user, "home").await.unwrap();
    let text = persistence.create_text(&user, "memo", None).await.unwrap();
    persistence
        .upsert_assignment(&user, &tagkeep::Assignment::manual(text.id.clone(), work.id.clone()))
        .await
        .unwrap();

    let classifier = MockClassifier::returning(vec![Candidate::new(home.id.clone(), "home", 0.8)]);
    let api = session(persistence.clone(), Arc::new(classifier), &quiet_config()).await;
    let before = api.assignments(&text.id);

    persistence.fail_next();
    let err = api.reclassify(&text.id).await.unwrap_err();
    assert_eq!(
        err.as_mutation().unwrap().rollback,
        RollbackOutcome::Exact
    );
    assert_eq!(api.assignments(&text.id), before);
    assert_eq!(
        persistence.list_assignments(&user, &text.id).await.unwrap(),
        before
    );
}

#[tokio::test]
async fn failure_after_stale_rows_were_deleted_resyncs_to_the_source_of_record() {
    let persistence = Arc::new(ScriptedPersistence::new());
    let user = alice();
    let tag1 = persistence.create_tag(&user, "Tag1").await.unwrap();
    let tag2 = persistence.create_tag(&user, "Tag2").await.unwrap();
    let text = persistence.create_text(&user, "A", None).await.unwrap();
    persistence
        .upsert_assignment(&user, &tagkeep::Assignment::ai(text.id.clone(), tag1.id.clone(), 0.9).unwrap())
        .await
        .unwrap();

    let classifier = MockClassifier::returning(vec![Candidate::new(tag2.id.clone(), "Tag2", 0.8)]);
    let api = session(persistence.clone(), Arc::new(classifier), &quiet_config()).await;
    assert_eq!(api.assignments(&text.id).len(), 1);

    // The stale AI row is deleted, then the fresh one fails to land
    persistence.pass_next();
    persistence.fail_next();
    let err = api.reclassify(&text.id).await.unwrap_err();
    assert!(err.as_mutation().is_some());

    let stored = persistence.list_assignments(&user, &text.id).await.unwrap();
    assert!(stored.is_empty());
    assert_eq!(api.assignments(&text.id), stored);
}

#[tokio::test]
async fn hallucinated_and_out_of_range_candidates_are_dropped() {
    let persistence = Arc::new(MemoryPersistence::new());
    let user = alice();
    let work = persistence.create_tag(&user, "work").await.unwrap();
    let text = persistence.create_text(&user, "memo", None).await.unwrap();

    let classifier = MockClassifier::returning(vec![
        Candidate::new(TagId::from_string("not-in-glossary"), "ghost", 0.9),
        Candidate::new(work.id.clone(), "work", 1.7),
        Candidate::new(work.id.clone(), "work", 0.4),
    ]);
    let api = session(persistence, Arc::new(classifier), &quiet_config()).await;

    api.reclassify(&text.id).await.unwrap();
    let assignments = api.assignments(&text.id);
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].tag_id, work.id);
    assert_eq!(assignments[0].confidence, 0.4);
}

// === Scenario: new texts are classified on creation ===

#[tokio::test]
async fn add_text_classifies_when_configured() {
    let persistence = Arc::new(MemoryPersistence::new());
    let work = persistence.create_tag(&alice(), "work").await.unwrap();
    let classifier = MockClassifier::returning(vec![Candidate::new(work.id.clone(), "work", 0.75)]);

    let mut config = TagkeepConfig::default();
    config.engine.resync_after_commit = false;
    let api = session(persistence, Arc::new(classifier), &config).await;

    let added = api.add_text("  quarterly report  ").await.unwrap();
    assert_eq!(added.text.content, "quarterly report");
    assert!(added.classification.unwrap().is_committed());
    assert_eq!(api.texts("work").len(), 1);
}

#[tokio::test]
async fn add_text_survives_classifier_outage() {
    let classifier = MockClassifier::failing(ClassifierError::Unavailable("down".into()));
    let api = session(
        Arc::new(MemoryPersistence::new()),
        Arc::new(classifier),
        &TagkeepConfig::default(),
    )
    .await;

    let added = api.add_text("memo").await.unwrap();
    assert!(added.classification.is_none());
    assert_eq!(api.texts("").len(), 1);
    assert!(api.assignments(&added.text.id).is_empty());
}

#[tokio::test]
async fn reclassify_many_continues_past_failures() {
    let persistence = Arc::new(MemoryPersistence::new());
    let user = alice();
    let work = persistence.create_tag(&user, "work").await.unwrap();
    let a = persistence.create_text(&user, "a", None).await.unwrap();
    let b = persistence.create_text(&user, "b", None).await.unwrap();

    let classifier = MockClassifier::returning(vec![Candidate::new(work.id.clone(), "work", 0.5)])
        .then(Err(ClassifierError::Timeout(std::time::Duration::from_secs(30))));
    let api = session(persistence, Arc::new(classifier), &quiet_config()).await;

    let report = api
        .reclassify_many(&[a.id.clone(), b.id.clone(), tagkeep::TextId::from_string("missing")])
        .await;
    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded, vec![b.id.clone()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].0, a.id);
}
