//! Static column tables for the bets pipeline: the raw layer keeps dates as
//! strings exactly as the upstream API sends them; the master layer carries
//! the typed shape shared by master and analytics partitions.

use std::sync::Arc;

use polars::prelude::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Statuses that mean a bet has been settled.
pub const TERMINAL_STATUS: [&str; 3] = ["WON", "LOSE", "DRAW"];

/// Natural key of a bet record, raw-layer column names.
pub const RAW_KEY_FIELDS: [&str; 2] = ["customer", "transId"];
/// Natural key, master-layer column names.
pub const MASTER_KEY_FIELDS: [&str; 2] = ["Customer", "TransId"];

/// Tie-break field used by deduplication, per layer.
pub const RAW_MODIFY_DATE_FIELD: &str = "modifyDate";
pub const MASTER_MODIFY_DATE_FIELD: &str = "ModifyDate";

pub const RAW_TSTAMP_FIELD: &str = "tstamp";
pub const RAW_STATUS_FIELD: &str = "status";

/// Raw string fields normalized into `Datetime` columns.
pub const RAW_DATETIME_FIELDS: [&str; 4] = ["transDate", "checkTime", "modifyDate", "settledTime"];
/// Raw string fields normalized into `Date` columns.
pub const RAW_DATE_FIELDS: [&str; 1] = ["winlostdate"];

/// Master partitions are keyed by the transaction date, analytics partitions
/// by the settlement date, gated on the eligibility flag.
pub const MASTER_PARTITION_FIELD: &str = "TransDate";
pub const ANALYTICS_PARTITION_FIELD: &str = "Winlostdate";
pub const ELIGIBILITY_FIELD: &str = "Ruben";

/// Release marker column stamped onto every merged batch.
pub const COMMENT_FIELD: &str = "__comment";

fn datetime() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

// The nested payload keeps its wire types in every layer; date fields inside
// the struct stay strings so partitions never need a nested temporal cast.
fn sub_bet_fields() -> Vec<Field> {
    let date_type = DataType::String;

    vec![
        Field::new("transId".into(), DataType::Int64),
        Field::new("transDate".into(), date_type.clone()),
        Field::new("refNo".into(), DataType::Int64),
        Field::new("custId".into(), DataType::Int64),
        Field::new("oddsId".into(), DataType::Int64),
        Field::new("hdp1".into(), DataType::Float64),
        Field::new("hdp2".into(), DataType::Float64),
        Field::new("odds".into(), DataType::Float64),
        Field::new("betteam".into(), DataType::String),
        Field::new("matchId".into(), DataType::Int64),
        Field::new("matchDate".into(), date_type.clone()),
        Field::new("ruben".into(), DataType::Int64),
        Field::new("statusWinlost".into(), DataType::Int64),
        Field::new("bettype".into(), DataType::Int64),
        Field::new("sportId".into(), DataType::Int64),
        Field::new("matchResultId".into(), DataType::Int64),
        Field::new("newBetType".into(), DataType::Int64),
        Field::new("displayType".into(), DataType::Int64),
        Field::new("betCondition".into(), DataType::String),
        Field::new("betTypeGroupId".into(), DataType::Int64),
        Field::new("tStamp".into(), DataType::String),
        Field::new("status".into(), DataType::String),
        Field::new("liveHomeScore".into(), DataType::Int64),
        Field::new("liveAwayScore".into(), DataType::Int64),
        Field::new("liveindicator".into(), DataType::Boolean),
        Field::new("actualOdds".into(), DataType::Float64),
        Field::new("checkTime".into(), date_type),
        Field::new("acceptingStatus".into(), DataType::Int64),
        Field::new("rejectReason".into(), DataType::Int64),
        Field::new("fullTimeHomeScore".into(), DataType::Int64),
        Field::new("fullTimeAwayScore".into(), DataType::Int64),
        Field::new("firstHalfHomeScore".into(), DataType::Int64),
        Field::new("firstHalfAwayScore".into(), DataType::Int64),
    ]
}

fn sub_bet_dtype() -> DataType {
    DataType::List(Box::new(DataType::Struct(sub_bet_fields())))
}

/// Raw-layer schema: field names and wire types exactly as ingested.
pub fn raw_schema() -> Vec<(&'static str, DataType)> {
    vec![
        ("customer", DataType::String),
        ("transId", DataType::Int64),
        ("refno", DataType::Int64),
        ("custId", DataType::Int64),
        ("transDate", DataType::String),
        ("oddsId", DataType::Int64),
        ("hdp1", DataType::Float64),
        ("hdp2", DataType::Float64),
        ("odds", DataType::Float64),
        ("stake", DataType::Float64),
        ("status", DataType::String),
        ("winlost", DataType::Float64),
        ("liveHomeScore", DataType::Int32),
        ("liveAwayScore", DataType::Int32),
        ("liveIndicator", DataType::Boolean),
        ("betteam", DataType::String),
        ("creator", DataType::String),
        ("comstatus", DataType::String),
        ("winlostdate", DataType::String),
        ("betfrom", DataType::String),
        ("sportsFrom", DataType::Int16),
        ("agtPT", DataType::Float32),
        ("maPT", DataType::Float32),
        ("smaPT", DataType::Float32),
        ("totalPT", DataType::Float32),
        ("agtWinlost", DataType::Float32),
        ("maWinlost", DataType::Float32),
        ("smaWinlost", DataType::Float32),
        ("playerDiscount", DataType::Float32),
        ("agtDiscount", DataType::Float32),
        ("maDiscount", DataType::Float32),
        ("smaDiscount", DataType::Float32),
        ("playerComm", DataType::Float32),
        ("agtComm", DataType::Float32),
        ("maComm", DataType::Float32),
        ("smaComm", DataType::Float32),
        ("actualRate", DataType::Float64),
        ("matchId", DataType::Int64),
        ("mOdds", DataType::Int32),
        ("agtId", DataType::Int64),
        ("maId", DataType::Int32),
        ("smaId", DataType::Int32),
        ("ruben", DataType::Int32),
        ("statusWinlost", DataType::Int16),
        ("bettype", DataType::Int16),
        ("currency", DataType::Int16),
        ("actual_Stake", DataType::Float64),
        ("transDesc", DataType::String),
        ("ip", DataType::String),
        ("userName", DataType::String),
        ("currencyStr", DataType::String),
        ("oddsStyle", DataType::Int64),
        ("betStatus", DataType::String),
        ("creatorName", DataType::String),
        ("sportId", DataType::Int64),
        ("leagueId", DataType::Int64),
        ("dangerLevel", DataType::Int64),
        ("countryCode", DataType::String),
        ("directCustId", DataType::Int32),
        ("matchResultId", DataType::Int64),
        ("newBetType", DataType::Int64),
        ("displayType", DataType::Int64),
        ("betCondition", DataType::String),
        ("betTypeGroupId", DataType::Int64),
        ("memberStatus", DataType::Int32),
        ("betPage", DataType::Int16),
        ("locationId", DataType::Int32),
        ("tstamp", DataType::String),
        ("acceptingStatus", DataType::Int32),
        ("rejectReason", DataType::Int32),
        ("checkTime", DataType::String),
        ("actualOdds", DataType::Float64),
        ("isAutoAccept", DataType::Boolean),
        ("extRefID", DataType::Int64),
        ("delAccountID", DataType::String),
        ("lastCashBalance", DataType::Float32),
        ("modifyDate", DataType::String),
        ("actionId", DataType::Int32),
        ("webId", DataType::Int64),
        ("streamerId", DataType::Int32),
        ("remark", DataType::String),
        ("fullTimeHomeScore", DataType::Int32),
        ("fullTimeAwayScore", DataType::Int32),
        ("firstHalfHomeScore", DataType::Int32),
        ("firstHalfAwayScore", DataType::Int32),
        ("mpBonusRatio", DataType::Float32),
        ("oddsProvider", DataType::Int32),
        ("minBet", DataType::Float32),
        ("maxBet", DataType::Float32),
        ("oddsMaxBet", DataType::Float32),
        ("fingerprint", DataType::String),
        ("betGameTime", DataType::String),
        ("settledTime", DataType::String),
        ("originalId", DataType::Int64),
        ("customizeWebId", DataType::Int32),
        ("subBet", sub_bet_dtype()),
    ]
}

/// Master-layer schema: renamed columns with their declared analytical types.
pub fn master_schema() -> Vec<(&'static str, DataType)> {
    vec![
        ("Customer", DataType::String),
        ("TransId", DataType::UInt64),
        ("Refno", DataType::UInt64),
        ("CustId", DataType::UInt64),
        ("TransDate", datetime()),
        ("OddsId", DataType::UInt64),
        ("Hdp1", DataType::Float64),
        ("Hdp2", DataType::Float64),
        ("Odds", DataType::Float64),
        ("Stake", DataType::Float64),
        ("Status", DataType::String),
        ("Winlost", DataType::Float64),
        ("LiveHomeScore", DataType::Int16),
        ("LiveAwayScore", DataType::Int16),
        ("LiveIndicator", DataType::Boolean),
        ("Betteam", DataType::String),
        ("Creator", DataType::String),
        ("Comstatus", DataType::String),
        ("Winlostdate", DataType::Date),
        ("Betfrom", DataType::String),
        ("SportsFrom", DataType::UInt8),
        ("AgtPT", DataType::Float32),
        ("MaPT", DataType::Float32),
        ("SmaPT", DataType::Float32),
        ("TotalPT", DataType::Float32),
        ("AgtWinlost", DataType::Float32),
        ("MaWinlost", DataType::Float32),
        ("SmaWinlost", DataType::Float32),
        ("PlayerDiscount", DataType::Float32),
        ("AgtDiscount", DataType::Float32),
        ("MaDiscount", DataType::Float32),
        ("SmaDiscount", DataType::Float32),
        ("PlayerComm", DataType::Float32),
        ("AgtComm", DataType::Float32),
        ("MaComm", DataType::Float32),
        ("SmaComm", DataType::Float32),
        ("ActualRate", DataType::Float64),
        ("MatchId", DataType::UInt32),
        ("MOdds", DataType::Int32),
        ("AgtId", DataType::UInt32),
        ("MaId", DataType::UInt32),
        ("SmaId", DataType::UInt32),
        ("Ruben", DataType::UInt8),
        ("StatusWinlost", DataType::Int16),
        ("Bettype", DataType::Int16),
        ("Currency", DataType::Int16),
        ("Actual_Stake", DataType::Float64),
        ("TransDesc", DataType::String),
        ("Ip", DataType::String),
        ("UserName", DataType::String),
        ("CurrencyStr", DataType::String),
        ("OddsStyle", DataType::Int32),
        ("BetStatus", DataType::String),
        ("CreatorName", DataType::String),
        ("SportId", DataType::UInt32),
        ("LeagueId", DataType::UInt32),
        ("DangerLevel", DataType::UInt8),
        ("CountryCode", DataType::String),
        ("DirectCustId", DataType::Int32),
        ("MatchResultId", DataType::UInt32),
        ("NewBetType", DataType::Int32),
        ("DisplayType", DataType::Int32),
        ("BetCondition", DataType::String),
        ("BetTypeGroupId", DataType::UInt32),
        ("MemberStatus", DataType::Int32),
        ("BetPage", DataType::Int16),
        ("LocationId", DataType::UInt32),
        ("Tstamp", DataType::String),
        ("AcceptingStatus", DataType::Int16),
        ("RejectReason", DataType::Int16),
        ("CheckTime", datetime()),
        ("ActualOdds", DataType::Float64),
        ("IsAutoAccept", DataType::Boolean),
        ("ExtRefID", DataType::UInt32),
        ("DelAccountID", DataType::UInt32),
        ("LastCashBalance", DataType::Float32),
        ("ModifyDate", datetime()),
        ("ActionId", DataType::UInt32),
        ("WebId", DataType::UInt32),
        ("StreamerId", DataType::Int8),
        ("Remark", DataType::String),
        ("FullTimeHomeScore", DataType::Int16),
        ("FullTimeAwayScore", DataType::Int16),
        ("FirstHalfHomeScore", DataType::Int16),
        ("FirstHalfAwayScore", DataType::Int16),
        ("MpBonusRatio", DataType::Float32),
        ("OddsProvider", DataType::Int16),
        ("MinBet", DataType::Float32),
        ("MaxBet", DataType::Float32),
        ("OddsMaxBet", DataType::Float32),
        ("Fingerprint", DataType::String),
        ("BetGameTime", DataType::String),
        ("SettledTime", datetime()),
        ("OriginalId", DataType::UInt32),
        ("CustomizeWebId", DataType::UInt32),
        ("SubBet", sub_bet_dtype()),
        (COMMENT_FIELD, DataType::String),
    ]
}

/// Control-log CSV schema: `index, day, insertion_type, n_registers,
/// duration, start_execution, end_execution, comments`.
pub fn control_fields() -> Vec<(&'static str, DataType)> {
    vec![
        ("index", DataType::UInt32),
        ("day", DataType::String),
        ("insertion_type", DataType::String),
        ("n_registers", DataType::UInt32),
        ("duration", DataType::Float32),
        ("start_execution", DataType::String),
        ("end_execution", DataType::String),
        ("comments", DataType::String),
    ]
}

pub fn control_schema_ref() -> SchemaRef {
    Arc::new(Schema::from_iter(
        control_fields()
            .into_iter()
            .map(|(name, dtype)| Field::new(name.into(), dtype)),
    ))
}

/// Raw column name -> master column name (leading capital).
pub fn master_column_name(raw_name: &str) -> String {
    let mut chars = raw_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_column_names_capitalize_first_letter() {
        assert_eq!(master_column_name("customer"), "Customer");
        assert_eq!(master_column_name("transId"), "TransId");
        assert_eq!(master_column_name("actual_Stake"), "Actual_Stake");
    }

    #[test]
    fn master_schema_mirrors_raw_plus_comment() {
        let raw = raw_schema();
        let master = master_schema();
        assert_eq!(master.len(), raw.len() + 1);
        for ((raw_name, _), (master_name, _)) in raw.iter().zip(master.iter()) {
            assert_eq!(&master_column_name(raw_name), master_name);
        }
        assert_eq!(master.last().map(|(name, _)| *name), Some(COMMENT_FIELD));
    }
}
