// src/db.rs - Connection pool and schema setup

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let options = config.connect_options()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to PostgreSQL at {}", config.describe()))?;

    ping(&pool).await.context("Database did not answer the startup ping")?;

    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Ordered DDL applied at startup. Every statement is idempotent.
const SCHEMA: &[(&str, &str)] = &[
    (
        "usuarios",
        r#"
        CREATE TABLE IF NOT EXISTS usuarios (
            id UUID PRIMARY KEY,
            nombre TEXT NOT NULL CHECK (length(nombre) > 0 AND length(nombre) <= 150),
            email TEXT NOT NULL UNIQUE CHECK (length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            rol TEXT NOT NULL DEFAULT 'orientador' CHECK (rol IN ('admin', 'orientador')),
            activo BOOLEAN NOT NULL DEFAULT TRUE,
            ultimo_acceso TIMESTAMPTZ,
            intentos_fallidos INTEGER NOT NULL DEFAULT 0,
            bloqueado_hasta TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "estudiantes",
        r#"
        CREATE TABLE IF NOT EXISTS estudiantes (
            id UUID PRIMARY KEY,
            nombre TEXT NOT NULL CHECK (length(nombre) > 0 AND length(nombre) <= 100),
            apellido TEXT,
            rut TEXT NOT NULL,
            fecha_nacimiento DATE,
            email TEXT,
            telefono TEXT,
            direccion TEXT,
            curso TEXT,
            apoderado_nombre TEXT,
            apoderado_telefono TEXT,
            apoderado_email TEXT,
            estado TEXT NOT NULL DEFAULT 'Activo' CHECK (estado IN ('Activo', 'Inactivo')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "agenda",
        r#"
        CREATE TABLE IF NOT EXISTS agenda (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            id_orientador UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            fecha DATE NOT NULL,
            hora TIME,
            motivo TEXT NOT NULL CHECK (length(motivo) > 0),
            lugar TEXT,
            estado TEXT NOT NULL DEFAULT 'programada'
                CHECK (estado IN ('programada', 'realizada', 'cancelada')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "entrevistas",
        r#"
        CREATE TABLE IF NOT EXISTS entrevistas (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            id_orientador UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            id_agenda UUID UNIQUE REFERENCES agenda (id) ON DELETE SET NULL,
            fecha DATE NOT NULL,
            motivo TEXT NOT NULL CHECK (length(motivo) > 0),
            observaciones TEXT,
            conclusiones TEXT,
            estado TEXT NOT NULL DEFAULT 'pendiente'
                CHECK (estado IN ('pendiente', 'realizada', 'cancelada')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "asistencia",
        r#"
        CREATE TABLE IF NOT EXISTS asistencia (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            id_agenda UUID UNIQUE REFERENCES agenda (id) ON DELETE CASCADE,
            fecha DATE NOT NULL,
            tipo TEXT NOT NULL DEFAULT 'Pendiente'
                CHECK (tipo IN ('Presente', 'Ausente', 'Pendiente')),
            justificacion TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "recursos",
        r#"
        CREATE TABLE IF NOT EXISTS recursos (
            id UUID PRIMARY KEY,
            nombre TEXT NOT NULL CHECK (length(nombre) > 0 AND length(nombre) <= 150),
            tipo TEXT,
            descripcion TEXT,
            stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "entregas_recursos",
        r#"
        CREATE TABLE IF NOT EXISTS entregas_recursos (
            id UUID PRIMARY KEY,
            id_recurso UUID NOT NULL REFERENCES recursos (id) ON DELETE CASCADE,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            cantidad INTEGER NOT NULL CHECK (cantidad > 0),
            fecha_entrega DATE NOT NULL DEFAULT CURRENT_DATE,
            observaciones TEXT,
            entregado_por UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "alertas",
        r#"
        CREATE TABLE IF NOT EXISTS alertas (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            tipo TEXT NOT NULL CHECK (length(tipo) > 0),
            descripcion TEXT,
            prioridad TEXT NOT NULL DEFAULT 'media' CHECK (prioridad IN ('baja', 'media', 'alta')),
            estado TEXT NOT NULL DEFAULT 'activa'
                CHECK (estado IN ('activa', 'en_proceso', 'resuelta')),
            fecha_resolucion TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "intervenciones",
        r#"
        CREATE TABLE IF NOT EXISTS intervenciones (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            id_responsable UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            fecha DATE NOT NULL,
            tipo TEXT NOT NULL CHECK (length(tipo) > 0),
            descripcion TEXT,
            resultado TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "seguimiento_academico",
        r#"
        CREATE TABLE IF NOT EXISTS seguimiento_academico (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            fecha DATE NOT NULL,
            categoria TEXT,
            observacion TEXT NOT NULL CHECK (length(observacion) > 0),
            registrado_por UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "seguimiento_psicosocial",
        r#"
        CREATE TABLE IF NOT EXISTS seguimiento_psicosocial (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            fecha DATE NOT NULL,
            categoria TEXT,
            observacion TEXT NOT NULL CHECK (length(observacion) > 0),
            registrado_por UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "comunicaciones",
        r#"
        CREATE TABLE IF NOT EXISTS comunicaciones (
            id UUID PRIMARY KEY,
            id_estudiante UUID NOT NULL REFERENCES estudiantes (id),
            medio TEXT NOT NULL CHECK (medio IN ('email', 'telefono', 'presencial', 'libreta')),
            asunto TEXT,
            contenido TEXT NOT NULL CHECK (length(contenido) > 0),
            fecha DATE NOT NULL DEFAULT CURRENT_DATE,
            registrado_por UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "registro_actividad",
        r#"
        CREATE TABLE IF NOT EXISTS registro_actividad (
            id UUID PRIMARY KEY,
            id_usuario UUID REFERENCES usuarios (id) ON DELETE SET NULL,
            accion TEXT NOT NULL,
            entidad TEXT NOT NULL,
            id_entidad TEXT,
            descripcion TEXT,
            ip TEXT,
            user_agent TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    // RUT is unique among enrolled students only, so a soft-deleted RUT can be re-enrolled.
    "ALTER TABLE estudiantes DROP CONSTRAINT IF EXISTS estudiantes_rut_key",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_estudiantes_rut_activo ON estudiantes (rut) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_estudiantes_estado ON estudiantes (estado) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_estudiantes_curso ON estudiantes (curso)",
    "CREATE INDEX IF NOT EXISTS idx_agenda_estudiante ON agenda (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_agenda_fecha ON agenda (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_entrevistas_estudiante ON entrevistas (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_entrevistas_fecha ON entrevistas (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_asistencia_estudiante ON asistencia (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_asistencia_fecha ON asistencia (fecha)",
    "CREATE INDEX IF NOT EXISTS idx_entregas_recurso ON entregas_recursos (id_recurso)",
    "CREATE INDEX IF NOT EXISTS idx_entregas_estudiante ON entregas_recursos (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_alertas_estado ON alertas (estado)",
    "CREATE INDEX IF NOT EXISTS idx_alertas_estudiante ON alertas (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_intervenciones_estudiante ON intervenciones (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_seg_academico_estudiante ON seguimiento_academico (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_seg_psicosocial_estudiante ON seguimiento_psicosocial (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_comunicaciones_estudiante ON comunicaciones (id_estudiante)",
    "CREATE INDEX IF NOT EXISTS idx_registro_actividad_created ON registro_actividad (created_at DESC)",
];

// Serializes schema setup across processes starting against the same database.
const MIGRATION_LOCK_ID: i64 = 0x5160_0001;

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut conn = pool.acquire().await.context("Failed to acquire a migration connection")?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await
        .context("Failed to take the migration lock")?;

    let result = apply_schema(&mut conn).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await
        .context("Failed to release the migration lock")?;

    result?;
    log::info!("Database schema ready ({} tables)", SCHEMA.len());
    Ok(())
}

async fn apply_schema(conn: &mut PgConnection) -> Result<()> {
    for (table, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create index: {}", ddl))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_order_respects_foreign_keys() {
        let position = |name: &str| SCHEMA.iter().position(|(t, _)| *t == name).unwrap();

        for (table, ddl) in SCHEMA {
            for (referenced, _) in SCHEMA {
                if ddl.contains(&format!("REFERENCES {} ", referenced)) {
                    assert!(
                        position(*referenced) < position(*table),
                        "{} must be created before {}",
                        referenced,
                        table
                    );
                }
            }
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        for (table, ddl) in SCHEMA {
            assert!(ddl.contains("IF NOT EXISTS"), "{} DDL is not idempotent", table);
        }
        for ddl in INDEXES {
            assert!(ddl.contains("IF NOT EXISTS") || ddl.contains("IF EXISTS"), "{}", ddl);
        }
    }

    #[test]
    fn test_link_tables_are_unique_per_agenda_entry() {
        let ddl_for = |name: &str| SCHEMA.iter().find(|(t, _)| *t == name).unwrap().1;
        assert!(ddl_for("entrevistas").contains("id_agenda UUID UNIQUE"));
        assert!(ddl_for("asistencia").contains("id_agenda UUID UNIQUE"));
    }

    #[test]
    fn test_rut_unique_only_among_enrolled_students() {
        let ddl = SCHEMA.iter().find(|(t, _)| *t == "estudiantes").unwrap().1;
        assert!(ddl.contains("rut TEXT NOT NULL,"));
        assert!(INDEXES
            .iter()
            .any(|i| i.contains("UNIQUE INDEX") && i.contains("(rut) WHERE deleted_at IS NULL")));
    }
}
