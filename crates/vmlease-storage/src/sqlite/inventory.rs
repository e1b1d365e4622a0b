//! 인벤토리 저장소 (Cluster/Node/TemplateRepository 포트 구현).

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::{Cluster, ClusterCredentials, ClusterId, Node};
use vmlease_core::models::template::{Template, TemplateId};
use vmlease_core::ports::repository::{ClusterRepository, NodeRepository, TemplateRepository};

use super::{db_err, SqliteStorage};

const CLUSTER_COLUMNS: &str = "id, name, host, port, token_id, token_secret, verify_tls, \
     is_active, max_vms_per_node, max_concurrent_sessions, cpu_overcommit_ratio, \
     memory_overcommit_ratio";

const TEMPLATE_COLUMNS: &str = "id, name, os_type, protocol, hypervisor_template_id, cpu_cores, \
     memory_mb, disk_gb, is_active, guest_username, guest_password, port_override";

fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    Ok(Cluster {
        id: ClusterId(row.get(0)?),
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        credentials: ClusterCredentials {
            token_id: row.get(4)?,
            token_secret: row.get(5)?,
            verify_tls: row.get(6)?,
        },
        is_active: row.get(7)?,
        max_vms_per_node: row.get(8)?,
        max_concurrent_sessions: row.get(9)?,
        cpu_overcommit_ratio: row.get(10)?,
        memory_overcommit_ratio: row.get(11)?,
    })
}

/// 문자열 컬럼 → 도메인 열거형
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CoreError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    let memory_mb: i64 = row.get(6)?;
    let disk_gb: i64 = row.get(7)?;
    Ok(Template {
        id: TemplateId(row.get(0)?),
        name: row.get(1)?,
        os_type: row.get(2)?,
        protocol: parse_column(row, 3)?,
        hypervisor_template_id: row.get(4)?,
        cpu_cores: row.get(5)?,
        memory_mb: memory_mb.max(0) as u64,
        disk_gb: disk_gb.max(0) as u64,
        is_active: row.get(8)?,
        guest_username: row.get(9)?,
        guest_password: row.get(10)?,
        port_override: row.get(11)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        cluster_id: ClusterId(row.get(0)?),
        name: row.get(1)?,
        status: parse_column(row, 2)?,
        max_vms: row.get(3)?,
    })
}

impl SqliteStorage {
    fn query_nodes(&self, sql: &str, cluster_id: ClusterId) -> Result<Vec<Node>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err("노드 쿼리 준비 실패"))?;
        let nodes = stmt
            .query_map([cluster_id.0], node_from_row)
            .map_err(db_err("노드 조회 실패"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("노드 행 읽기 실패"))?;
        Ok(nodes)
    }

    /// 클러스터 활성 여부 변경 (운영자 드레인)
    pub fn set_cluster_active(&self, id: ClusterId, active: bool) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE clusters SET is_active = ?2 WHERE id = ?1",
                params![id.0, active],
            )
            .map_err(db_err("클러스터 갱신 실패"))?;
        if updated == 0 {
            return Err(CoreError::not_found("Cluster", id));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterRepository for SqliteStorage {
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<ClusterId, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO clusters (name, host, port, token_id, token_secret, verify_tls, \
             is_active, max_vms_per_node, max_concurrent_sessions, cpu_overcommit_ratio, \
             memory_overcommit_ratio) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                cluster.name,
                cluster.host,
                cluster.port,
                cluster.credentials.token_id,
                cluster.credentials.token_secret,
                cluster.credentials.verify_tls,
                cluster.is_active,
                cluster.max_vms_per_node,
                cluster.max_concurrent_sessions,
                cluster.cpu_overcommit_ratio,
                cluster.memory_overcommit_ratio,
            ],
        )
        .map_err(db_err("클러스터 저장 실패"))?;
        Ok(ClusterId(conn.last_insert_rowid()))
    }

    async fn find_cluster(&self, id: ClusterId) -> Result<Option<Cluster>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CLUSTER_COLUMNS} FROM clusters WHERE id = ?1"),
            [id.0],
            cluster_from_row,
        )
        .optional()
        .map_err(db_err("클러스터 조회 실패"))
    }

    async fn list_active_clusters(&self) -> Result<Vec<Cluster>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLUSTER_COLUMNS} FROM clusters WHERE is_active = 1 ORDER BY id"
            ))
            .map_err(db_err("클러스터 쿼리 준비 실패"))?;
        let clusters = stmt
            .query_map([], cluster_from_row)
            .map_err(db_err("클러스터 조회 실패"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("클러스터 행 읽기 실패"))?;
        Ok(clusters)
    }
}

#[async_trait]
impl NodeRepository for SqliteStorage {
    async fn upsert_node(&self, node: &Node) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nodes (cluster_id, name, status, max_vms, updated_at) \
             VALUES (?1, ?2, ?3, ?4, datetime('now')) \
             ON CONFLICT(cluster_id, name) DO UPDATE SET \
             status = excluded.status, max_vms = excluded.max_vms, updated_at = excluded.updated_at",
            params![node.cluster_id.0, node.name, node.status.as_str(), node.max_vms],
        )
        .map_err(db_err("노드 저장 실패"))?;
        Ok(())
    }

    async fn list_nodes(&self, cluster_id: ClusterId) -> Result<Vec<Node>, CoreError> {
        self.query_nodes(
            "SELECT cluster_id, name, status, max_vms FROM nodes WHERE cluster_id = ?1 ORDER BY name",
            cluster_id,
        )
    }

    async fn list_online_nodes(&self, cluster_id: ClusterId) -> Result<Vec<Node>, CoreError> {
        self.query_nodes(
            "SELECT cluster_id, name, status, max_vms FROM nodes \
             WHERE cluster_id = ?1 AND status = 'online' ORDER BY name",
            cluster_id,
        )
    }
}

#[async_trait]
impl TemplateRepository for SqliteStorage {
    async fn insert_template(&self, template: &Template) -> Result<TemplateId, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO templates (name, os_type, protocol, hypervisor_template_id, cpu_cores, \
             memory_mb, disk_gb, is_active, guest_username, guest_password, port_override) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                template.name,
                template.os_type,
                template.protocol.as_str(),
                template.hypervisor_template_id,
                template.cpu_cores,
                template.memory_mb as i64,
                template.disk_gb as i64,
                template.is_active,
                template.guest_username,
                template.guest_password,
                template.port_override,
            ],
        )
        .map_err(db_err("템플릿 저장 실패"))?;
        Ok(TemplateId(conn.last_insert_rowid()))
    }

    async fn find_template(&self, id: TemplateId) -> Result<Option<Template>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1"),
            [id.0],
            template_from_row,
        )
        .optional()
        .map_err(db_err("템플릿 조회 실패"))
    }

    async fn list_active_templates(&self) -> Result<Vec<Template>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE is_active = 1 ORDER BY name"
            ))
            .map_err(db_err("템플릿 쿼리 준비 실패"))?;
        let templates = stmt
            .query_map([], template_from_row)
            .map_err(db_err("템플릿 조회 실패"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("템플릿 행 읽기 실패"))?;
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmlease_core::models::cluster::NodeStatus;
    use vmlease_core::models::template::Protocol;

    fn sample_cluster(name: &str) -> Cluster {
        Cluster {
            id: ClusterId(0),
            name: name.to_string(),
            host: format!("{name}.lab"),
            port: 8006,
            credentials: ClusterCredentials {
                token_id: "root@pam!vmlease".into(),
                token_secret: "secret".into(),
                verify_tls: false,
            },
            is_active: true,
            max_vms_per_node: 8,
            max_concurrent_sessions: 40,
            cpu_overcommit_ratio: 2.0,
            memory_overcommit_ratio: 1.2,
        }
    }

    #[tokio::test]
    async fn cluster_roundtrip_and_active_filter() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = storage.insert_cluster(&sample_cluster("a")).await.unwrap();
        let b = storage.insert_cluster(&sample_cluster("b")).await.unwrap();
        storage.set_cluster_active(b, false).unwrap();

        let loaded = storage.find_cluster(a).await.unwrap().unwrap();
        assert_eq!(loaded.id, a);
        assert_eq!(loaded.cpu_overcommit_ratio, 2.0);
        assert!(!loaded.credentials.verify_tls);

        let active = storage.list_active_clusters().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "a");
    }

    #[tokio::test]
    async fn node_upsert_updates_status() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cluster = storage.insert_cluster(&sample_cluster("a")).await.unwrap();

        for (name, status) in [("pve2", NodeStatus::Online), ("pve1", NodeStatus::Online)] {
            storage
                .upsert_node(&Node {
                    cluster_id: cluster,
                    name: name.into(),
                    status,
                    max_vms: 10,
                })
                .await
                .unwrap();
        }
        storage
            .upsert_node(&Node {
                cluster_id: cluster,
                name: "pve2".into(),
                status: NodeStatus::Maintenance,
                max_vms: 10,
            })
            .await
            .unwrap();

        let all = storage.list_nodes(cluster).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "pve1");

        let online = storage.list_online_nodes(cluster).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].name, "pve1");
    }

    #[tokio::test]
    async fn template_roundtrip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let template = Template {
            id: TemplateId(0),
            name: "Ubuntu 24.04".into(),
            os_type: "ubuntu".into(),
            protocol: Protocol::Vnc,
            hypervisor_template_id: 9000,
            cpu_cores: 2,
            memory_mb: 4096,
            disk_gb: 32,
            is_active: true,
            guest_username: None,
            guest_password: Some("pw".into()),
            port_override: Some(5901),
        };
        let id = storage.insert_template(&template).await.unwrap();

        let loaded = storage.find_template(id).await.unwrap().unwrap();
        assert_eq!(loaded.protocol, Protocol::Vnc);
        assert_eq!(loaded.connection_port(), 5901);
        assert_eq!(storage.list_active_templates().await.unwrap().len(), 1);
        assert!(storage.find_template(TemplateId(99)).await.unwrap().is_none());
    }
}
