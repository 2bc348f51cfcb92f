//! Payroll/ERP reader (`SPEC_FULL.md` §4.1, §6): read-only Viewpoint/Vista
//! queries over TDS. The SQL driver itself is an out-of-scope external
//! collaborator (`SPEC_FULL.md` §1) — this is thin wiring, not a hardened
//! ODBC layer, and only the `sql_auth` authentication mode is implemented.
//! `managed_identity` requires an Azure AD token acquired from the vault
//! (also out of scope) and is rejected at startup with a clear error.

use async_trait::async_trait;
use sa_core::config::{ErpConfig, SqlAuthMode};
use sa_core::models::{DepartmentRecord, EmployeeRecord, JobRecord, TitleRecord};
use sa_core::traits::ErpReader;
use sa_core::{Error, Result};
use std::sync::Arc;
use tiberius::{AuthMethod, Client, Config, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type TdsClient = Client<Compat<TcpStream>>;

pub struct ViewpointErpReader {
    config: Config,
    // Tiberius connections are not `Sync`-safe for concurrent queries; the
    // reconciler only ever runs one syncer at a time (§5), so a single
    // mutex-guarded connection is sufficient.
    client: Mutex<Option<TdsClient>>,
}

impl ViewpointErpReader {
    pub fn connect(erp: &ErpConfig, username: Option<String>, password: Option<String>) -> Result<Self> {
        if erp.auth_mode == SqlAuthMode::ManagedIdentity {
            return Err(Error::Config(
                "SQL_AUTH_MODE=managed_identity requires an Azure AD token source, which is out of scope here; set SQL_AUTH_MODE=sql_auth with SQL_USERNAME/SQL_PASSWORD".into(),
            ));
        }

        let mut config = Config::new();
        let (host, port) = split_host_port(&erp.server);
        config.host(host);
        config.port(port);
        config.database(&erp.database);
        config.trust_cert();
        config.authentication(AuthMethod::sql_server(
            username.unwrap_or_default(),
            password.unwrap_or_default(),
        ));

        Ok(Self {
            config,
            client: Mutex::new(None),
        })
    }

    async fn client(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        tcp.set_nodelay(true).map_err(|e| Error::network(e.to_string()))?;
        let client = Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        *guard = Some(client);
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.client().await?;
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().expect("connected above");
        let stream = client
            .simple_query(sql)
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        stream
            .into_first_result()
            .await
            .map_err(|e| Error::network(e.to_string()))
    }
}

fn split_host_port(server: &str) -> (&str, u16) {
    match server.split_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(1433)),
        None => (server, 1433),
    }
}

fn col(row: &Row, name: &str) -> Option<String> {
    row.try_get::<&str, _>(name)
        .ok()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

const EMPLOYEES_QUERY: &str = r#"
SELECT
    Employee, FirstName, MidName, LastName, Sex, PRDept, Email, udEmpTitle,
    BirthDate, HireDate, TermDate, Phone, Address, City, State, Zip
FROM bPREH
WHERE PRCo = 1 AND HireDate IS NOT NULL AND TermDate IS NULL
"#;

const RECENT_JOBS_QUERY: &str = r#"
WITH RankedRecords AS (
    SELECT JC.Job, JC.Employee,
           ROW_NUMBER() OVER (PARTITION BY JC.Employee ORDER BY JC.PREndDate DESC) AS RowNum
    FROM bPRJC AS JC
    LEFT JOIN bJCJM AS JM ON JM.JCCo = JC.PRCo AND JM.Job = JC.Job
    WHERE JC.PREndDate > '2024-01-01' AND JM.JobStatus = 1
)
SELECT Job, Employee FROM RankedRecords WHERE RowNum = 1
"#;

const JOBS_QUERY: &str = r#"
SELECT JM.Job, JM.Description, CM.Department, JM.ShipAddress, JM.ShipCity, JM.ShipState, JM.ShipZip
FROM bJCJM AS JM
LEFT JOIN bJCCM AS CM ON CM.Contract = JM.Contract AND CM.JCCo = JM.JCCo
WHERE JM.JCCo = 1 AND JM.JobStatus = 1
"#;

const DEPARTMENTS_QUERY: &str = "SELECT PRDept, Description, udRegion FROM bPRDP WHERE PRCo = 1";

const TITLES_QUERY: &str = r#"
SELECT DISTINCT udEmpTitle FROM bPREH WHERE PRCo = 1 AND HireDate IS NOT NULL AND TermDate IS NULL
"#;

#[async_trait]
impl ErpReader for ViewpointErpReader {
    async fn active_employees(&self) -> Result<Vec<EmployeeRecord>> {
        let recent_jobs = self.query(RECENT_JOBS_QUERY).await?;
        let mut job_by_employee = std::collections::HashMap::new();
        for row in &recent_jobs {
            if let (Some(emp), Some(job)) = (col(row, "Employee"), col(row, "Job")) {
                job_by_employee.insert(emp, job);
            }
        }

        let rows = self.query(EMPLOYEES_QUERY).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let employee_no = col(row, "Employee")?;
                let job_code = job_by_employee.get(&employee_no).cloned();
                Some(EmployeeRecord {
                    first_name: col(row, "FirstName"),
                    middle_name: col(row, "MidName"),
                    last_name: col(row, "LastName"),
                    email: col(row, "Email"),
                    gender_raw: col(row, "Sex"),
                    phone: col(row, "Phone"),
                    street: col(row, "Address"),
                    city: col(row, "City"),
                    state: col(row, "State"),
                    zip: col(row, "Zip"),
                    hire_date: col(row, "HireDate"),
                    birth_date: col(row, "BirthDate"),
                    pr_dept: col(row, "PRDept"),
                    job_code,
                    title: col(row, "udEmpTitle"),
                    term_date: col(row, "TermDate"),
                    employee_no,
                })
            })
            .collect())
    }

    async fn departments(&self) -> Result<Vec<DepartmentRecord>> {
        let rows = self.query(DEPARTMENTS_QUERY).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(DepartmentRecord {
                    pr_dept: col(row, "PRDept")?,
                    description: col(row, "Description"),
                    region: col(row, "udRegion"),
                })
            })
            .collect())
    }

    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = self.query(JOBS_QUERY).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(JobRecord {
                    job_code: col(row, "Job")?,
                    description: col(row, "Description"),
                    department: col(row, "Department"),
                    ship_address: col(row, "ShipAddress"),
                    ship_city: col(row, "ShipCity"),
                    ship_state: col(row, "ShipState"),
                    ship_zip: col(row, "ShipZip"),
                })
            })
            .collect())
    }

    async fn titles(&self) -> Result<Vec<TitleRecord>> {
        let rows = self.query(TITLES_QUERY).await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some(TitleRecord { name: col(row, "udEmpTitle")? }))
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.query("SELECT 1 AS ok").await.map(|_| ())
    }
}

pub fn erp_reader_from_env(erp: &ErpConfig) -> Result<Arc<dyn ErpReader>> {
    let username = std::env::var("SQL_USERNAME").ok();
    let password = std::env::var("SQL_PASSWORD").ok();
    Ok(Arc::new(ViewpointErpReader::connect(erp, username, password)?))
}
