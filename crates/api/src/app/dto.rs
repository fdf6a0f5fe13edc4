use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use ledgerd_core::{BalanceSnapshot, Movement, Statement};
use ledgerd_infra::ledger_engine::MovementRequest;

// -------------------------
// Request DTOs
// -------------------------

/// Movement body. Every field is optional here; the engine reports what is
/// missing or malformed.
#[derive(Debug, Deserialize)]
pub struct MovementBody {
    pub valor: Option<serde_json::Value>,
    pub tipo: Option<String>,
    pub descricao: Option<String>,
}

impl MovementBody {
    /// `valor` must be a JSON integer; `1.5` or `"10"` count as absent.
    pub fn into_request(self) -> MovementRequest {
        MovementRequest {
            amount: self.valor.as_ref().and_then(serde_json::Value::as_i64),
            kind: self.tipo,
            note: self.descricao,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub limite: i64,
    pub saldo: i64,
}

impl From<BalanceSnapshot> for BalanceResponse {
    fn from(snapshot: BalanceSnapshot) -> Self {
        Self {
            limite: snapshot.limit,
            saldo: snapshot.balance,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatementResponse {
    pub saldo: StatementBalance,
    pub ultimas_transacoes: Vec<StatementEntry>,
}

#[derive(Debug, Serialize)]
pub struct StatementBalance {
    pub total: i64,
    pub data_extrato: String,
    pub limite: i64,
}

#[derive(Debug, Serialize)]
pub struct StatementEntry {
    pub valor: i64,
    pub tipo: &'static str,
    pub descricao: String,
    pub realizada_em: String,
}

impl From<Statement> for StatementResponse {
    fn from(statement: Statement) -> Self {
        Self {
            saldo: StatementBalance {
                total: statement.balance.balance,
                data_extrato: rfc3339(statement.taken_at),
                limite: statement.balance.limit,
            },
            ultimas_transacoes: statement.movements.into_iter().map(StatementEntry::from).collect(),
        }
    }
}

impl From<Movement> for StatementEntry {
    fn from(m: Movement) -> Self {
        Self {
            valor: m.amount.cents(),
            tipo: m.kind.code(),
            descricao: m.note.as_str().to_string(),
            realizada_em: rfc3339(m.occurred_at),
        }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: serde_json::Value) -> MovementBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn integer_valor_is_kept() {
        let req = body(json!({"valor": 1000, "tipo": "c", "descricao": "salario"})).into_request();
        assert_eq!(req, MovementRequest::credit(1000, "salario"));
    }

    #[test]
    fn non_integer_valor_is_dropped() {
        for valor in [json!(1.5), json!("10"), json!(null)] {
            let req = body(json!({"valor": valor, "tipo": "d", "descricao": "x"})).into_request();
            assert_eq!(req.amount, None, "{valor}");
        }
    }

    #[test]
    fn missing_fields_stay_missing() {
        let req = body(json!({})).into_request();
        assert_eq!(req, MovementRequest::default());
    }
}
