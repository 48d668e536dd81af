//! JSON-Based Integration Tests
//!
//! These tests verify that system descriptions load through the factory and
//! that the shipped ring oscillator runs as expected.

use pinvm::components::Tie;
use pinvm::system_config::{ConfiguredSystem, SystemFactory};
use pinvm::{ConfigIssue, LogicState, SimError};

fn ring_oscillator() -> ConfiguredSystem {
    let result = SystemFactory::new().create_from_json("configs/ring_oscillator.json");
    assert!(result.is_ok(), "Failed to load ring oscillator: {:?}", result.err());
    result.unwrap()
}

fn watched_ticks(system: &ConfiguredSystem, label: &str) -> Vec<(u64, u64)> {
    let watch = system
        .watched
        .iter()
        .find(|w| w.label == label)
        .unwrap_or_else(|| panic!("{} is not watched", label));
    system
        .engine
        .trace()
        .of(watch.board, watch.component, &watch.pin)
        .iter()
        .map(|r| (r.tick, r.new))
        .collect()
}

#[cfg(test)]
mod json_system_tests {
    use super::*;

    #[test]
    fn test_ring_oscillator_loading() {
        let system = ring_oscillator();
        let info = system.get_system_info();

        assert_eq!(info.name, "RingOscillator");
        assert_eq!(info.board_count, 1);
        assert_eq!(info.component_count, 8);

        let labels: Vec<&str> = system.watched.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["INV4.Y", "SAMPLE.Q", "CLKGEN.CLK"]);
        assert_eq!(system.engine.config().trace_capacity, 4096);
    }

    #[test]
    fn test_ring_oscillator_run() {
        let mut system = ring_oscillator();
        system.engine.init().unwrap();
        assert_eq!(system.engine.run(24), 24);

        let node_a = watched_ticks(&system, "INV4.Y");
        let expected: Vec<(u64, u64)> = (1..=12).map(|n| (2 * n, n % 2)).collect();
        assert_eq!(node_a, expected);

        assert_eq!(
            watched_ticks(&system, "SAMPLE.Q"),
            vec![(4, 1), (10, 0), (16, 1), (22, 0)]
        );

        let clock: Vec<u64> = watched_ticks(&system, "CLKGEN.CLK").iter().map(|(t, _)| *t).collect();
        assert_eq!(clock, vec![3, 6, 9, 12, 15, 18, 21, 24]);

        assert!(system.engine.diagnostics().is_empty());
        assert_eq!(system.engine.violations(), (0, 0));
    }

    #[test]
    fn test_missing_file() {
        let result = SystemFactory::new().create_from_json("configs/does_not_exist.json");
        assert!(matches!(result, Err(SimError::Io(_))));
    }

    #[test]
    fn test_invalid_json() {
        let result = SystemFactory::new().create_from_str("{ \"name\": \"broken\", \"boards\": [ }");
        assert!(matches!(result, Err(SimError::Json(_))));
    }

    #[test]
    fn test_unknown_component_type() {
        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"type": "cpu", "name": "U1"}]}]}"#;
        let err = SystemFactory::new().create_from_str(json).unwrap_err();
        assert!(matches!(err.issue(), Some(ConfigIssue::MalformedBoard(_))));
        assert!(err.to_string().contains("main/U1"));
    }

    #[test]
    fn test_unsupported_bus_width() {
        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"type": "bus", "name": "DATA", "properties": {"width": 12}}]}]}"#;
        let err = SystemFactory::new().create_from_str(json).unwrap_err();
        assert_eq!(err.issue(), Some(&ConfigIssue::UnsupportedWidth(12)));
    }

    #[test]
    fn test_unknown_clock_domain() {
        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"type": "dff", "name": "FF", "properties": {"domain": "NOPE"}}]}]}"#;
        assert!(SystemFactory::new().create_from_str(json).is_err());
    }

    #[test]
    fn test_stimulus_is_scheduled() {
        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"type": "driver", "name": "DRV", "properties": {"width": 8}},
                           {"type": "probe", "name": "P", "properties": {"width": 8}}],
            "connections": [{"source": {"component": "DRV", "pin": "OUT"},
                             "targets": [{"component": "P", "pin": "IN"}]}],
            "watch": [{"component": "P", "pin": "IN"}],
            "stimulus": [{"component": "DRV", "pin": "OUT", "value": 165, "tick": 3}]}]}"#;
        let mut system = SystemFactory::new().create_from_str(json).unwrap();
        system.engine.init().unwrap();
        system.engine.run(5);

        assert_eq!(watched_ticks(&system, "P.IN"), vec![(3, 0xA5)]);
        let watch = &system.watched[0];
        let signal = system.engine.signal(watch.board, watch.component, "IN").unwrap();
        assert_eq!(signal.state, LogicState::Strong1);
    }

    #[test]
    fn test_custom_component_registration() {
        let mut factory = SystemFactory::empty();
        assert!(factory.component_types().is_empty());
        factory.register("pullup", |config, _| Ok(Box::new(Tie::high(&config.name, 1))));
        factory.register("probe", |config, _| {
            Ok(Box::new(pinvm::components::Probe::new(&config.name, 1)))
        });
        assert_eq!(factory.component_types(), vec!["probe", "pullup"]);

        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"component_type": "pullup", "name": "R1"},
                           {"type": "probe", "name": "P"}],
            "connections": [{"source": {"component": "R1", "pin": "OUT"},
                             "targets": [{"component": "P", "pin": "IN"}]}]}]}"#;
        let mut system = factory.create_from_str(json).unwrap();
        system.engine.init().unwrap();
        system.engine.tick();

        let board = system.engine.find_board("main").unwrap();
        let probe = system.engine.board(board).unwrap().find("P").unwrap();
        let signal = system.engine.signal(board, probe, "IN").unwrap();
        assert_eq!((signal.value, signal.state), (1, LogicState::Weak1));
    }
}
