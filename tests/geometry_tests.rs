use optobot::geometry::{
    column_major_well_index, linear_to_gapped_offset, well_plate_index, AddressMapper,
    IterationAnchor, PlateGeometry,
};
use rstest::rstest;

fn standard_mapper(plates: usize, batch: usize) -> AddressMapper {
    AddressMapper::new(PlateGeometry::new(8, 12), plates, batch, 1)
}

#[rstest]
#[case::first_iteration(1, 0, IterationAnchor { start_index: 0, plate: 0, row_offset: 0 })]
#[case::fourth_row(1, 3, IterationAnchor { start_index: 36, plate: 0, row_offset: 3 })]
#[case::second_plate(2, 8, IterationAnchor { start_index: 96, plate: 1, row_offset: 0 })]
#[case::last_row_of_second_plate(2, 15, IterationAnchor { start_index: 180, plate: 1, row_offset: 7 })]
fn test_iteration_anchor(
    #[case] plates: usize,
    #[case] iteration: usize,
    #[case] expected: IterationAnchor,
) {
    assert_eq!(standard_mapper(plates, 12).anchor(iteration), expected);
}

#[test]
fn test_fourth_iteration_fills_row_d_column_major() {
    let mapper = standard_mapper(1, 12);
    let wells = mapper.resolve_iteration(3).unwrap();

    assert_eq!(wells.len(), 12);
    for (column, well) in wells.iter().enumerate() {
        assert_eq!(well.plate, 0);
        assert_eq!(well.row, 3);
        assert_eq!(well.column, column);
        assert_eq!(well.well_index, column * 8 + 3);
        assert_eq!(well.table_row, 3);
    }
    assert_eq!(wells[0].name(), "D1");
    assert_eq!(wells[11].name(), "D12");
}

#[test]
fn test_second_plate_skips_blank_row_in_tables() {
    let mapper = standard_mapper(2, 12);
    let wells = mapper.resolve_iteration(8).unwrap();

    assert!(wells.iter().all(|w| w.plate == 1 && w.row == 0));
    // 8 rows of plate 0, then one blank row.
    assert!(wells.iter().all(|w| w.table_row == 9));
    assert_eq!(
        wells.iter().map(|w| w.well_index).collect::<Vec<_>>(),
        (0..12).map(|c| c * 8).collect::<Vec<_>>()
    );
    assert_eq!(mapper.row_labels()[8], "");
    assert_eq!(mapper.row_labels()[9], "A");
}

#[test]
fn test_robot_order_runs_down_columns() {
    let mapper = standard_mapper(1, 12);
    // A1 is robot well 0, A2 is robot well 8 (after A1..H1).
    assert_eq!(mapper.resolve(0).unwrap().well_index, 0);
    assert_eq!(mapper.resolve(1).unwrap().well_index, 8);
    // B1 is robot well 1.
    assert_eq!(mapper.resolve(12).unwrap().well_index, 1);
    assert_eq!(column_major_well_index(7, 11, 8), 95);
}

#[test]
fn test_batch_straddling_plates_is_resolved_per_well() {
    let mapper = AddressMapper::new(PlateGeometry::new(8, 12), 2, 10, 1);
    let wells = mapper.resolve_iteration(9).unwrap();

    assert_eq!(wells.iter().filter(|w| w.plate == 0).count(), 6);
    assert_eq!(wells.iter().filter(|w| w.plate == 1).count(), 4);
    assert_eq!(wells[5].name(), "H12");
    assert_eq!(wells[6].name(), "A1");
    assert_eq!(wells[6].table_row, 9);
    assert_eq!(mapper.plates_in_iteration(9).unwrap(), vec![0, 1]);
}

#[test]
fn test_batch_crossing_row_boundary() {
    let mapper = AddressMapper::new(PlateGeometry::new(8, 12), 1, 5, 0);
    let wells = mapper.resolve_iteration(2).unwrap();

    let names: Vec<String> = wells.iter().map(|w| w.name()).collect();
    assert_eq!(names, vec!["A11", "A12", "B1", "B2", "B3"]);
    assert_eq!(mapper.anchor(2).row_offset, 0);
}

#[rstest]
#[case(0, 12, 96, 0)]
#[case(7, 12, 96, 0)]
#[case(8, 12, 96, 1)]
#[case(9, 10, 96, 0)]
#[case(10, 10, 96, 1)]
fn test_well_plate_index(
    #[case] iteration: usize,
    #[case] batch: usize,
    #[case] wells_per_plate: usize,
    #[case] expected: usize,
) {
    assert_eq!(well_plate_index(iteration, batch, wells_per_plate), expected);
}

#[rstest]
#[case::first_plate(36, 0, 36)]
#[case::second_plate_one_blank_row(96, 1, 108)]
#[case::third_plate_two_blank_rows(192, 2, 216)]
fn test_gapped_offset(#[case] linear: usize, #[case] plate: usize, #[case] expected: usize) {
    assert_eq!(linear_to_gapped_offset(linear, 12, 1, plate), expected);
}

#[test]
fn test_capacity_and_max_iterations() {
    let mapper = standard_mapper(2, 12);
    assert_eq!(mapper.capacity(), 192);
    assert_eq!(mapper.max_iterations(), 16);
    assert_eq!(mapper.table_rows(), 17);

    assert!(mapper.resolve_iteration(15).is_ok());
    assert!(mapper.resolve_iteration(16).is_err());
}
