use pretty_assertions::assert_eq;
use trace_metrics::dataset::Dataset;
use trace_metrics::metrics::{calc_exc_metrics, Columns, GroupBy};
use trace_metrics::trace::{Event, EventStream, StreamId};
use trace_metrics::utils::config::EngineConfig;

fn rank_with_foo(rank: u32, start: i64, spent: i64) -> EventStream {
    EventStream::new(
        StreamId::rank(rank),
        vec![
            Event::enter(start, "foo").on(rank, 0),
            Event::leave(start + spent, "foo").on(rank, 0),
        ],
    )
    .unwrap()
}

fn derived(streams: Vec<EventStream>) -> Dataset {
    let mut dataset = Dataset::from_streams(streams, EngineConfig::default()).unwrap();
    dataset.calc_exc_metrics(&Columns::All).unwrap();
    dataset
}

#[test]
fn test_scenario_a_metrics() {
    let mut stream = EventStream::new(
        StreamId::rank(0),
        vec![
            Event::enter(0, "A"),
            Event::enter(10, "B"),
            Event::leave(30, "B"),
            Event::leave(50, "A"),
        ],
    )
    .unwrap();
    calc_exc_metrics(&mut stream, &Columns::All).unwrap();

    assert_eq!(stream.inclusive("time", 0), Some(50.0));
    assert_eq!(stream.inclusive("time", 1), Some(20.0));
    assert_eq!(stream.exclusive("time", 0), Some(30.0));
    assert_eq!(stream.exclusive("time", 1), Some(20.0));
    assert_eq!(stream.exclusive("time", 2), None);
}

#[test]
fn test_scenario_c_mean_of_process_sums() {
    let dataset = derived(vec![rank_with_foo(0, 0, 10), rank_with_foo(1, 100, 10)]);

    let profile = dataset.flat_profile(&Columns::All, &GroupBy::Name, false).unwrap();
    assert_eq!(profile.len(), 1);
    let foo = profile.row("foo").unwrap();
    assert_eq!(foo.exclusive("time"), Some(10.0));
    assert_eq!(foo.process, None);

    let per_process = dataset.flat_profile(&Columns::All, &GroupBy::Name, true).unwrap();
    let rows: Vec<(Option<u32>, Option<f64>)> = per_process
        .rows_for("foo")
        .map(|r| (r.process, r.exclusive("time")))
        .collect();
    assert_eq!(rows, vec![(Some(0), Some(10.0)), (Some(1), Some(10.0))]);
}

#[test]
fn test_flat_profile_is_not_a_total() {
    let dataset = derived(vec![rank_with_foo(0, 0, 10), rank_with_foo(1, 0, 30)]);

    let profile = dataset.flat_profile(&Columns::All, &GroupBy::Name, false).unwrap();
    assert_eq!(profile.row("foo").unwrap().exclusive("time"), Some(20.0));
}

#[test]
fn test_exclusive_never_exceeds_inclusive() {
    let events = vec![
        Event::enter(0, "main"),
        Event::enter(3, "a"),
        Event::enter(4, "b"),
        Event::leave(9, "b"),
        Event::leave(11, "a"),
        Event::enter(12, "a"),
        Event::leave(20, "a"),
        Event::instant(21, "mark"),
        Event::leave(40, "main"),
    ];
    let mut stream = EventStream::new(StreamId::rank(0), events).unwrap();
    calc_exc_metrics(&mut stream, &Columns::All).unwrap();

    let mut enters = 0;
    for event in stream.events().iter().filter(|e| e.is_enter()) {
        let inc = stream.inclusive("time", event.index).unwrap();
        let exc = stream.exclusive("time", event.index).unwrap();
        assert!(exc >= 0.0 && exc <= inc, "{:?}: exc {} inc {}", event.name, exc, inc);
        enters += 1;
    }
    assert_eq!(enters, 4);

    // Exclusive values of all calls add up to the root's inclusive value
    let total: f64 = stream
        .events()
        .iter()
        .filter_map(|e| stream.exclusive("time", e.index))
        .sum();
    assert_eq!(total, 40.0);
}

#[test]
fn test_group_by_attribute() {
    let stream = EventStream::new(
        StreamId::rank(0),
        vec![
            Event::enter(0, "send").with_attr("region", "comm"),
            Event::leave(4, "send").with_attr("region", "comm"),
            Event::enter(5, "recv").with_attr("region", "comm"),
            Event::leave(11, "recv").with_attr("region", "comm"),
            Event::enter(12, "dgemm").with_attr("region", "compute"),
            Event::leave(32, "dgemm").with_attr("region", "compute"),
        ],
    )
    .unwrap();
    let dataset = derived(vec![stream]);

    let profile = dataset
        .flat_profile(&Columns::All, &GroupBy::Attribute("region".to_string()), false)
        .unwrap();
    let keys: Vec<(&str, f64)> = profile
        .rows
        .iter()
        .map(|r| (r.key.as_str(), r.calls))
        .collect();
    assert_eq!(keys, vec![("compute", 1.0), ("comm", 2.0)]);
    assert_eq!(profile.row("comm").unwrap().exclusive("time"), Some(10.0));
}

#[test]
fn test_load_imbalance_ranks_uneven_functions_first() {
    let mut streams = Vec::new();
    for (rank, spent) in [(0u32, 10i64), (1, 10), (2, 40)] {
        streams.push(
            EventStream::new(
                StreamId::rank(rank),
                vec![
                    Event::enter(0, "even").on(rank, 0),
                    Event::leave(5, "even").on(rank, 0),
                    Event::enter(6, "skewed").on(rank, 0),
                    Event::leave(6 + spent, "skewed").on(rank, 0),
                ],
            )
            .unwrap(),
        );
    }
    let dataset = derived(streams);

    let rows = dataset.load_imbalance("time", 2).unwrap();
    assert_eq!(rows[0].name, "skewed");
    assert_eq!(rows[0].max, 40.0);
    assert_eq!(rows[0].mean, 20.0);
    assert_eq!(rows[0].imbalance, 2.0);
    assert_eq!(rows[0].top_processes, vec![(2, 40.0), (0, 10.0)]);
    assert_eq!(rows[1].name, "even");
    assert_eq!(rows[1].imbalance, 1.0);
}

#[test]
fn test_collapsed_stacks_across_ranks() {
    let stream = |rank: u32| {
        EventStream::new(
            StreamId::rank(rank),
            vec![
                Event::enter(0, "main").on(rank, 0),
                Event::enter(2, "solve").on(rank, 0),
                Event::leave(8, "solve").on(rank, 0),
                Event::leave(10, "main").on(rank, 0),
            ],
        )
        .unwrap()
    };
    let dataset = derived(vec![stream(0), stream(1)]);

    let mut stacks: Vec<(String, f64)> = dataset
        .collapsed_stacks("time")
        .unwrap()
        .into_iter()
        .map(|s| (s.stack, s.weight))
        .collect();
    stacks.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        stacks,
        vec![("main".to_string(), 8.0), ("main;solve".to_string(), 12.0)]
    );
}
