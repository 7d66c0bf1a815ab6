use std::collections::BTreeMap;

use meta_catalog::{Config, Error, MManager, MeasurementSchema, TagSchemaPlan};
use test_log::test;

fn manager(dir: &std::path::Path) -> meta_catalog::Result<MManager> {
    MManager::new(Config::new(dir).build())
}

#[test]
fn scenario_create_timeseries_registers_counter_and_log_lines() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.sg1")?;
    manager.create_timeseries(
        "root.sg1.d1.s1",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    )?;

    assert_eq!(manager.get_all_timeseries_name("root.sg1.*")?, vec!["root.sg1.d1.s1"]);
    assert_eq!(manager.series_count("root.sg1"), 1);

    let log = std::fs::read_to_string(dir.path().join("mlog.txt")).unwrap();
    assert_eq!(log.lines().count(), 2);

    Ok(())
}

#[test]
fn scenario_delete_timeseries_prunes_device_and_keeps_storage_group() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.sg1")?;
    manager.create_timeseries(
        "root.sg1.d1.s1",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    )?;

    manager.delete_timeseries("root.sg1.d1.s1")?;

    assert!(manager.get_all_timeseries_name("root.sg1.*")?.is_empty());
    assert!(manager.get_storage_group_name("root.sg1").is_ok());
    assert_eq!(manager.series_count("root.sg1"), 0);
    assert_eq!(manager.max_series_count(), 0);

    Ok(())
}

#[test]
fn scenario_determine_storage_group_trailing_wildcard() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.group1")?;
    manager.set_storage_group("root.group2")?;
    manager.set_storage_group("root.area1.group3")?;

    let map = manager.determine_storage_group("root.*")?;
    assert_eq!(map.get("root.group1").map(String::as_str), Some("root.group1.*"));
    assert_eq!(map.get("root.group2").map(String::as_str), Some("root.group2.*"));
    assert_eq!(
        map.get("root.area1.group3").map(String::as_str),
        Some("root.area1.group3.*")
    );

    Ok(())
}

#[test]
fn scenario_determine_storage_group_interior_wildcard() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.group1")?;
    manager.set_storage_group("root.group2")?;

    let map = manager.determine_storage_group("root.*.s1")?;
    assert_eq!(map.get("root.group1").map(String::as_str), Some("root.group1.s1"));
    assert_eq!(map.get("root.group2").map(String::as_str), Some("root.group2.s1"));

    Ok(())
}

#[test]
fn scenario_tag_query_finds_and_then_loses_deleted_series() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    let mut tags = BTreeMap::new();
    tags.insert("k".to_string(), "v".to_string());

    manager.set_storage_group("root.sg1")?;
    manager.create_timeseries(
        "root.sg1.d1.s1",
        MeasurementSchema::new(1, 2, 3),
        None,
        tags,
        BTreeMap::new(),
    )?;

    let plan = TagSchemaPlan {
        prefix: "root.sg1.*".to_string(),
        key: "k".to_string(),
        value: "v".to_string(),
        contains: false,
        offset: 0,
        limit: 0,
    };

    let rows = manager.get_all_timeseries_schema(&plan)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].full_path, "root.sg1.d1.s1");

    manager.delete_timeseries("root.sg1.d1.s1")?;
    assert!(manager.get_all_timeseries_schema(&plan)?.is_empty());

    Ok(())
}

#[test]
fn scenario_replay_restores_series_created_before_restart() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = manager(dir.path())?;
        manager.set_storage_group("root.sg")?;
        manager.create_timeseries(
            "root.sg.d.s",
            MeasurementSchema::new(1, 2, 3),
            None,
            BTreeMap::new(),
            BTreeMap::new(),
        )?;
    }

    let manager = manager(dir.path())?;
    assert_eq!(manager.get_all_timeseries_name("root.sg.*")?, vec!["root.sg.d.s"]);
    assert_eq!(manager.series_count("root.sg"), 1);

    Ok(())
}

#[test]
fn scenario_malformed_log_line_is_skipped_on_replay() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("mlog.txt"),
        "set_storage_group,root.sg\nnonsense\ncreate_timeseries,root.sg.d.s,1,2,3,,,-1\n",
    )
    .unwrap();

    let manager = manager(dir.path())?;
    assert_eq!(manager.get_all_timeseries_name("root.sg.*")?, vec!["root.sg.d.s"]);

    Ok(())
}

#[test]
fn storage_group_cannot_overlap_an_existing_one() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.a")?;
    assert!(matches!(
        manager.set_storage_group("root.a.b"),
        Err(Error::StorageGroupAlreadySet(_))
    ));

    Ok(())
}

#[test]
fn create_timeseries_without_storage_group_fails_when_auto_create_disabled() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    let result = manager.create_timeseries(
        "root.sg1.d1.s1",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    );

    assert!(matches!(result, Err(Error::StorageGroupNotSet(_))));

    Ok(())
}

#[test]
fn auto_create_schema_materializes_storage_group_on_first_write() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = MManager::new(Config::new(dir.path()).auto_create_schema(true).default_storage_group_level(1).build())?;

    manager.create_timeseries(
        "root.sg1.d1.s1",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    )?;

    assert!(manager.get_storage_group_name("root.sg1").is_ok());
    assert_eq!(manager.series_count("root.sg1"), 1);

    Ok(())
}

#[test]
fn set_storage_group_then_delete_round_trips_counters() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.sg1")?;
    manager.delete_storage_group("root.sg1")?;

    assert!(matches!(
        manager.get_storage_group_name("root.sg1"),
        Err(Error::StorageGroupNotSet(_))
    ));
    assert_eq!(manager.series_count("root.sg1"), 0);

    Ok(())
}

#[test]
fn wildcard_boundary_single_level_vs_trailing() -> meta_catalog::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path())?;

    manager.set_storage_group("root.sg1")?;
    manager.create_timeseries(
        "root.sg1.x.s",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    )?;
    manager.create_timeseries(
        "root.sg1.x.y.s",
        MeasurementSchema::new(1, 2, 3),
        None,
        BTreeMap::new(),
        BTreeMap::new(),
    )?;

    let mut single_level = manager.get_all_timeseries_name("root.sg1.*.s")?;
    single_level.sort();
    assert_eq!(single_level, vec!["root.sg1.x.s"]);

    let mut trailing = manager.get_all_timeseries_name("root.sg1.x.*")?;
    trailing.sort();
    assert_eq!(trailing, vec!["root.sg1.x.s", "root.sg1.x.y.s"]);

    Ok(())
}
