use criterion::*;
use pullxml_model::resolver::Resolver;
use pullxml_model::DtdBuilder;

/// An internal subset declaring `n` elements, each with a moderately nested content model and a
/// few attributes
fn subset(n: usize) -> String {
    let mut text = String::new();
    for i in 0..n {
        text.push_str(&format!(
            "<!ELEMENT e{i} (head{i}, (p | list | table)*, (foot{i} | note)?)>\n\
             <!ATTLIST e{i} kind (a|b|c) \"a\" version CDATA #FIXED \"1.0\">\n",
            i = i
        ));
    }
    text
}

fn build_dtd(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_many");
    let text = subset(200);
    let resolver = Resolver::default();
    group.bench_function("internal_subset", |b| {
        b.iter(|| {
            let mut builder = DtdBuilder::new("e0", None, &resolver);
            builder
                .internal_subset(&text, "bench.xml")
                .expect("builder.internal_subset()");
            builder.finish()
        });
    });
    group.finish();
}

criterion_group!(benches, build_dtd);
criterion_main!(benches);
