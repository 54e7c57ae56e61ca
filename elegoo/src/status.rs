use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// What the printer is doing, from `CurrentStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    /// Nothing running.
    Idle,
    /// A job is running.
    Printing,
    /// Any other code (exposure test, file transfer, ...).
    Other(i64),
}

/// The `Data.Status` object of a discovery response.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    /// The raw status code. Newer firmware reports a list; the first entry
    /// is the one that matters.
    #[serde(deserialize_with = "first_code")]
    pub current_status: i64,
    /// Details of the running job.
    #[serde(default)]
    pub print_info: Option<PrintInfo>,
}

impl Status {
    /// Decode the status code.
    pub fn activity(&self) -> Activity {
        match self.current_status {
            0 => Activity::Idle,
            1 => Activity::Printing,
            other => Activity::Other(other),
        }
    }
}

/// The `Data.Status.PrintInfo` object.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrintInfo {
    /// Non-zero when the job hit an error.
    pub error_number: i64,
    /// The job file.
    pub filename: String,
    /// Elapsed job ticks.
    pub current_ticks: i64,
    /// Total job ticks.
    pub total_ticks: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Response {
    data: Data,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Data {
    status: Status,
}

/// Parse a discovery response body.
pub fn parse_response(body: &[u8]) -> Result<Status> {
    serde_json::from_slice::<Response>(body)
        .map(|response| response.data.status)
        .map_err(|err| Error::Parse(err.to_string()))
}

fn first_code<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        One(i64),
        Many(Vec<i64>),
    }

    match Code::deserialize(deserializer)? {
        Code::One(code) => Ok(code),
        Code::Many(codes) => codes
            .first()
            .copied()
            .ok_or_else(|| serde::de::Error::custom("CurrentStatus is an empty list")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_printing() {
        let body = br#"{
            "Id": "f25273b12b094c5a8b9513a30ca60049",
            "Data": {
                "Attributes": {"Name": "Mars 4 Ultra", "MachineName": "Mars 4 Ultra"},
                "Status": {
                    "CurrentStatus": 1,
                    "PrintInfo": {
                        "Status": 3,
                        "ErrorNumber": 0,
                        "Filename": "rook.goo",
                        "CurrentTicks": 1200000,
                        "TotalTicks": 4800000
                    }
                }
            }
        }"#;

        let status = parse_response(body).unwrap();
        assert_eq!(status.activity(), Activity::Printing);
        assert_eq!(
            status.print_info,
            Some(PrintInfo {
                error_number: 0,
                filename: "rook.goo".to_string(),
                current_ticks: 1_200_000,
                total_ticks: 4_800_000,
            })
        );
    }

    #[test]
    fn test_parse_list_status() {
        let status = parse_response(br#"{"Data": {"Status": {"CurrentStatus": [7]}}}"#).unwrap();
        assert_eq!(status.activity(), Activity::Other(7));
        assert_eq!(status.print_info, None);
    }

    #[test]
    fn test_parse_missing_status() {
        assert!(matches!(parse_response(br#"{"Data": {}}"#), Err(Error::Parse(_))));
        assert!(matches!(parse_response(b"garbage"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_response(br#"{"Data": {"Status": {"CurrentStatus": []}}}"#),
            Err(Error::Parse(_))
        ));
    }
}
