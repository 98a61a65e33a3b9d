use criterion::{criterion_group, criterion_main, Criterion};
use navstate_core::{
    AppData, ConflictPolicy, DefaultedNameSet, EntityType, MetadataAnnotationIndex, MetadataShape,
    Multiplicity, ParameterReconciler, PropertyAnnotations, RedactionOptions, SelectOperator,
    SelectionVariant, SensitiveDataRedactor, Sign, StartupParameterSet, TechnicalParameterFilter,
};
use serde_json::Value;

fn mk_variant(properties: usize) -> SelectionVariant {
    let mut variant = SelectionVariant::new();
    let context_url = "/sap/opu/odata/sap/BENCH_SRV/$metadata#Orders";
    variant.set_filter_context_url(Some(context_url.to_string()));
    for index in 0..properties {
        let name = format!("Field{index}");
        let low = format!("sv{index}");
        if let Err(err) =
            variant.add_select_option(&name, Sign::Include, SelectOperator::Eq, low, None)
        {
            panic!("benchmark fixture select option rejected: {err}");
        }
    }
    variant
}

fn mk_startup(parameters: usize) -> StartupParameterSet {
    let mut startup = StartupParameterSet::new();
    for index in (0..parameters).step_by(2) {
        startup.insert(format!("Field{index}"), Value::String(format!("url{index}")));
        let extra = Value::Array(vec![Value::String("a".into()), Value::String("b".into())]);
        startup.insert(format!("Extra{index}"), extra);
    }
    startup.insert("sap-system".to_string(), Value::String("ER9".to_string()));
    startup
}

fn bench_reconcile(c: &mut Criterion) {
    let variant = mk_variant(200);
    let startup = mk_startup(200);
    let defaulted = DefaultedNameSet::new((0..200).step_by(4).map(|index| format!("Field{index}")));

    for policy in [ConflictPolicy::FirstWins, ConflictPolicy::Union] {
        let reconciler = ParameterReconciler::new(policy, TechnicalParameterFilter::default());
        c.bench_function(&format!("reconcile_200_properties_{policy}"), |b| {
            b.iter(|| {
                if let Err(err) = reconciler.reconcile(&variant, &startup, &defaulted) {
                    panic!("reconcile benchmark failed: {err}");
                }
            });
        });
    }
}

fn bench_redact(c: &mut Criterion) {
    let mut orders = EntityType::new("BENCH.Order").with_navigation(
        "Customer",
        "BENCH.Customer",
        Multiplicity::One,
    );
    for index in 0..200 {
        let annotations =
            PropertyAnnotations { sensitive: index % 10 == 0, ..PropertyAnnotations::default() };
        orders = orders.with_property(format!("Field{index}"), annotations);
    }
    let sensitive = PropertyAnnotations { sensitive: true, ..PropertyAnnotations::default() };
    let customer = EntityType::new("BENCH.Customer").with_property("Email", sensitive);
    let index = MetadataAnnotationIndex::new(MetadataShape::Legacy)
        .with_entity_set("Orders", orders)
        .with_entity_type(customer);
    let redactor = SensitiveDataRedactor::default();
    let options = RedactionOptions { remove_measures: true };
    let data = AppData::with_selection_variant(mk_variant(200));

    c.bench_function("redact_200_properties_legacy", |b| {
        b.iter(|| {
            let mut payload = data.clone();
            let outcome = redactor.redact(&mut payload, &index, options);
            if outcome.removed.len() != 20 {
                panic!("redact benchmark removed {} properties", outcome.removed.len());
            }
        });
    });
}

criterion_group!(reconcile_benches, bench_reconcile, bench_redact);
criterion_main!(reconcile_benches);
