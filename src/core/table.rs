use crate::domain::model::{Record, Table};
use crate::domain::ports::Storage;
use crate::utils::error::Result;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 解析 CSV，欄位不足的列以空字串補齊
pub fn parse_table(bytes: &[u8]) -> Result<Table> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = Table::new(&headers);

    for row in reader.records() {
        let row = row?;
        let mut record = Record::new();
        for (i, header) in headers.iter().enumerate() {
            record.set(header, row.get(i).unwrap_or(""));
        }
        table.push(record);
    }

    Ok(table)
}

pub fn table_to_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.headers)?;
    for record in &table.records {
        writer.write_record(table.headers.iter().map(|h| record.get(h)))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

pub async fn read_table<S: Storage>(storage: &S, path: &str) -> Result<Table> {
    let bytes = storage.read_file(path).await?;
    parse_table(&bytes)
}

pub async fn write_table<S: Storage>(storage: &S, path: &str, table: &Table) -> Result<()> {
    let bytes = table_to_csv(table)?;
    storage.write_file(path, &bytes).await
}

/// 去掉副檔名，報表檔以此為前綴（`out/l1.csv` → `out/l1`）
pub fn path_stem(path: &str) -> String {
    let p = std::path::Path::new(path);
    match p.extension() {
        Some(_) => p.with_extension("").to_string_lossy().into_owned(),
        None => path.to_string(),
    }
}

/// 與 `path` 同目錄的另一個檔案
pub fn sibling_path(path: &str, file_name: &str) -> String {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(file_name).to_string_lossy().into_owned()
        }
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_with_bom_and_short_rows() {
        let csv = b"\xEF\xBB\xBFrecord_id,title,abstract\n1,Liver HOPE trial,\"Line one, with comma\"\n2,Short row\n";
        let table = parse_table(csv).unwrap();

        assert_eq!(table.headers, vec!["record_id", "title", "abstract"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].get("abstract"), "Line one, with comma");
        assert_eq!(table.records[1].get("abstract"), "");
    }

    #[test]
    fn test_table_to_csv_keeps_header_order() {
        let mut table = Table::new(&["b", "a"]);
        let mut record = Record::new();
        record.set("a", "1");
        record.set("b", "two, words");
        table.push(record);

        let text = String::from_utf8(table_to_csv(&table).unwrap()).unwrap();
        assert_eq!(text, "b,a\n\"two, words\",1\n");
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(path_stem("out/layer1.csv"), "out/layer1");
        assert_eq!(path_stem("layer2"), "layer2");
        assert_eq!(sibling_path("out/layer2.csv", "human_review_list.csv"), "out/human_review_list.csv");
        assert_eq!(sibling_path("layer2.csv", "human_review_list.csv"), "human_review_list.csv");
    }
}
