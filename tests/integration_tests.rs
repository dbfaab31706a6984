use margin_report_builder::*;

const FACTS: &str = "\
Quarter,GeographyID,LOBID,TotalRevenue_$mm,Rev_TransactionalFees_$mm,TotalExpense_$mm,Exp_Technology_$mm
Q1-24,1,5,100,40,60,20
Q1-24,1,6,50,10,30,5
Q1-24,2,5,80,30,50,10
Q1-24,2,6,20,5,15,5
Q2-24,1,5,110,45,62,21
Q2-24,2,6,25,6,14,4
";

const GEOGRAPHY: &str = "\
GeographyID,GeographyName
1,EMEA
2,APAC
";

const LINE_OF_BUSINESS: &str = "\
LOBID,LineOfBusiness
5,Retail
6,Wholesale
";

const NAMING: &str = "\
Category,Fact_Margin naming,P&L Impact
Financial Result,TotalRevenue_$mm,Revenue
Financial Result,Rev Transaction Fees,Revenue
Financial Result,TotalExpense_$mm,Expense
Financial Result,Exp_Technology_$mm,Expense
Driver,Headcount_fte,
Financial Result,Margin_$mm,Margin
";

fn cell(value: &str) -> CellValue {
    if value.is_empty() {
        CellValue::Null
    } else if let Ok(number) = value.parse::<f64>() {
        CellValue::Number(number)
    } else {
        CellValue::from(value)
    }
}

fn records_from_csv(data: &str) -> anyhow::Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.to_string(), cell(value)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Keys each row by its first column, as the workbook parser does for dimension sheets.
fn dimension_table_from_csv(data: &str) -> anyhow::Result<DimensionTable> {
    let mut table = DimensionTable::new();
    for record in records_from_csv(data)? {
        let key = record
            .values()
            .next()
            .and_then(CellValue::as_key)
            .ok_or_else(|| anyhow::anyhow!("dimension row without an ID"))?;
        table.insert(key, record);
    }
    Ok(table)
}

fn load_workbook(facts: &str, naming: &str) -> anyhow::Result<WorkbookData> {
    let mut tables = DimensionTables::new();
    tables.insert("Dim_Geography".to_string(), dimension_table_from_csv(GEOGRAPHY)?);
    tables.insert(
        "Dim_LineOfBusiness".to_string(),
        dimension_table_from_csv(LINE_OF_BUSINESS)?,
    );

    Ok(WorkbookData::new(
        records_from_csv(facts)?,
        tables,
        records_from_csv(naming)?,
    ))
}

#[test]
fn test_multi_dimension_report() -> anyhow::Result<()> {
    let data = load_workbook(FACTS, NAMING)?;
    let request = ReportRequest::new(&["Geography", "LineOfBusiness"], &["Q1-24", "Q2-24"]);

    let report = build_report_with_verification(&data, &request, 1e-9)?;

    assert_eq!(
        report.schema.field_names(),
        vec![
            "TotalRevenue_$mm",
            "Rev Transaction Fees",
            "TotalExpense_$mm",
            "Exp_Technology_$mm"
        ]
    );
    assert!(report.schema.margin_fields.iter().any(|f| f == "Margin_$mm"));

    assert_eq!(
        report.outcome.row_keys,
        vec![
            "EMEA | Retail",
            "EMEA | Wholesale",
            "APAC | Retail",
            "APAC | Wholesale",
            "Total"
        ]
    );
    assert_eq!(report.outcome.dimension_values["Geography"], vec!["EMEA", "APAC"]);
    assert_eq!(
        report.outcome.dimension_values["LineOfBusiness"],
        vec!["Retail", "Wholesale"]
    );

    let table = &report.outcome.table;
    assert_eq!(table.get("EMEA | Retail", "Q1-24", "TotalRevenue_$mm"), Some(100.0));
    assert_eq!(table.get("EMEA | Retail", "Q1-24", "Margin"), Some(40.0));
    assert_eq!(table.get("EMEA | Retail", "Q1-24", "MarginPct"), Some(40.0));
    assert_eq!(table.get("APAC | Wholesale", "Q2-24", "Margin"), Some(11.0));
    assert_eq!(table.get("APAC | Wholesale", "Q2-24", "MarginPct"), Some(44.0));

    // Combinations with no records stay at zero.
    assert_eq!(table.get("EMEA | Wholesale", "Q2-24", "TotalRevenue_$mm"), Some(0.0));
    assert_eq!(table.get("EMEA | Wholesale", "Q2-24", "MarginPct"), Some(0.0));

    // The label resolves to the transactional fees column.
    assert_eq!(table.get("Total", "Q1-24", "Rev Transaction Fees"), Some(85.0));
    assert_eq!(table.get("Total", "Q1-24", "TotalRevenue_$mm"), Some(250.0));
    assert_eq!(table.get("Total", "Q1-24", "TotalExpense_$mm"), Some(155.0));
    assert_eq!(table.get("Total", "Q1-24", "Margin"), Some(95.0));
    assert_eq!(table.get("Total", "Q1-24", "MarginPct"), Some(38.0));
    assert_eq!(table.get("Total", "Q2-24", "Margin"), Some(59.0));

    let diagnostics = &report.outcome.diagnostics;
    assert_eq!(diagnostics.records_folded, 6);
    assert!(diagnostics.faults.is_empty());
    assert!(diagnostics.low_confidence.is_empty());

    Ok(())
}

#[test]
fn test_unknown_dimension_id_keeps_raw_label() -> anyhow::Result<()> {
    let facts = format!("{}Q1-24,2,9,12,0,2,0\n", FACTS);
    let data = load_workbook(&facts, NAMING)?;
    let request = ReportRequest::new(&["LineOfBusiness"], &["Q1-24"]);

    let report = build_report(&data, &request)?;

    assert_eq!(report.outcome.row_keys, vec!["Retail", "Wholesale", "9", "Total"]);
    assert_eq!(report.outcome.table.get("9", "Q1-24", "Margin"), Some(10.0));
    assert_eq!(
        report.outcome.table.get("Total", "Q1-24", "TotalRevenue_$mm"),
        Some(262.0)
    );

    Ok(())
}

#[test]
fn test_readiness_and_discovery() -> anyhow::Result<()> {
    let data = load_workbook(FACTS, NAMING)?;

    match assess_readiness(Some(&data)) {
        ReportReadiness::Ready {
            periods,
            line_items,
        } => {
            assert_eq!(periods, vec!["Q1-24", "Q2-24"]);
            assert_eq!(line_items.len(), 4);
            assert!(line_items.iter().all(|item| !item.is_margin));
        }
        other => panic!("expected a ready workbook, got {:?}", other),
    }

    let dimensions = discover_dimensions(&data.fact_margin_records);
    let names: Vec<&str> = dimensions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Geography", "LineOfBusiness"]);
    assert_eq!(dimensions[1].foreign_key, "LOBID");

    let empty_facts = load_workbook("Quarter,TotalRevenue_$mm\n", NAMING)?;
    assert_eq!(assess_readiness(Some(&empty_facts)), ReportReadiness::NoQuarters);

    Ok(())
}

#[test]
fn test_low_confidence_match_is_reported() -> anyhow::Result<()> {
    let naming = "\
Category,Fact_Margin naming,P&L Impact
Financial Result,Technology Spend,Expense
";
    let data = load_workbook(FACTS, naming)?;
    let report = build_report(&data, &ReportRequest::new(&[], &["Q1-24"]))?;

    let low = &report.outcome.diagnostics.low_confidence;
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].field_name, "Technology Spend");
    assert_eq!(low[0].matched_key, "Exp_Technology_$mm");
    assert_eq!(low[0].strategy, MatchStrategy::MajorityWords);
    assert!(low[0].confidence < 0.5);

    assert_eq!(
        report.outcome.table.get("Total", "Q1-24", "Technology Spend"),
        Some(40.0)
    );

    Ok(())
}

#[test]
fn test_statement_export() -> anyhow::Result<()> {
    let data = load_workbook(FACTS, NAMING)?;
    let request = ReportRequest::new(&["Geography", "LineOfBusiness"], &["Q1-24", "Q2-24"]);
    let report = build_report(&data, &request)?;

    let statement = report
        .statement("EMEA | Retail")
        .ok_or_else(|| anyhow::anyhow!("missing statement"))?;
    assert_eq!(
        statement.trend("TotalRevenue_$mm", "Q2-24"),
        Some(Trend::Up)
    );
    assert_eq!(statement.trend("Margin", "Q2-24"), Some(Trend::Up));
    assert_eq!(statement.value("MarginPct", "Q2-24"), Some(48.0 / 110.0 * 100.0));

    let exported = statement.to_csv();
    let mut reader = csv::Reader::from_reader(exported.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(headers, vec!["Line Item", "Field", "Indent", "Q1-24", "Q2-24"]);

    let mut margin_row = None;
    for row in reader.records() {
        let row = row?;
        if &row[1] == "Margin" {
            margin_row = Some((row[3].to_string(), row[4].to_string()));
        }
    }
    assert_eq!(
        margin_row,
        Some(("40.00".to_string(), "48.00".to_string()))
    );

    let markdown = report
        .total_statement()
        .ok_or_else(|| anyhow::anyhow!("missing total statement"))?
        .to_markdown();
    assert!(markdown.contains("| **Margin** | 95.00 | 59.00 |"));

    Ok(())
}

#[test]
fn test_report_from_stored_payload() -> anyhow::Result<()> {
    let data = load_workbook(FACTS, NAMING)?;
    let envelope = StoredWorkbook {
        data: Some(data.clone()),
    }
    .to_json()?;

    let restored = StoredWorkbook::from_json(&envelope)?
        .data
        .ok_or_else(|| anyhow::anyhow!("payload lost"))?;
    assert_eq!(restored, data);

    let request = ReportRequest::new(&["Geography"], &["Q1-24"]);
    let direct = build_report(&data, &request)?;
    let reloaded = build_report(&restored, &request)?;
    assert_eq!(direct.outcome.table, reloaded.outcome.table);

    Ok(())
}

#[test]
fn test_request_from_json() -> anyhow::Result<()> {
    let request: ReportRequest =
        serde_json::from_str(r#"{"dimensions": ["Geography"], "periods": ["Q2-24"]}"#)?;
    assert_eq!(request.low_confidence_threshold, 0.5);

    let data = load_workbook(FACTS, NAMING)?;
    let report = build_report(&data, &request)?;
    assert_eq!(report.outcome.row_keys, vec!["EMEA", "APAC", "Total"]);
    assert_eq!(report.outcome.diagnostics.records_outside_selection, 4);

    Ok(())
}
