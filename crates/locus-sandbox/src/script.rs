//! Run scripts and test file layout per runtime family

use crate::log::TEST_MARKER;
use locus_model::ProjectKind;

/// Port the service listens on inside the environment
#[inline]
#[must_use]
pub fn service_port(kind: ProjectKind) -> u16 {
    match kind {
        ProjectKind::Node => 3000,
        ProjectKind::Python => 8000,
    }
}

/// File name the generated test is written to
#[inline]
#[must_use]
pub fn test_file_name(kind: ProjectKind) -> &'static str {
    match kind {
        ProjectKind::Node => "generated_test.spec.js",
        ProjectKind::Python => "generated_test.py",
    }
}

/// Name of the run script placed at the environment root
pub const RUN_SCRIPT: &str = "run_tests.sh";

/// Rewrite stray localhost ports to the one the service listens on
#[must_use]
pub fn normalize_ports(source: &str, kind: ProjectKind) -> String {
    let target = format!("localhost:{}", service_port(kind));
    let stray: &[&str] = match kind {
        ProjectKind::Node => &["localhost:3001", "localhost:3002"],
        ProjectKind::Python => &["localhost:8001"],
    };
    stray
        .iter()
        .fold(source.to_string(), |acc, from| acc.replace(from, &target))
}

/// Container entry command installing shell tooling then running the script
#[must_use]
pub fn entry_command(kind: ProjectKind) -> String {
    match kind {
        ProjectKind::Node => {
            format!("apk add --no-cache bash curl > /dev/null 2>&1; bash /app/{RUN_SCRIPT}")
        }
        ProjectKind::Python => format!(
            "(apt-get update > /dev/null 2>&1 && apt-get install -y curl > /dev/null 2>&1); bash /app/{RUN_SCRIPT}"
        ),
    }
}

/// Render the run script
///
/// Installs dependencies, runs the optional fixture script, starts the
/// service in the background, waits for it, prints [`TEST_MARKER`] and
/// exits with the test runner's status.
#[must_use]
pub fn render_run_script(kind: ProjectKind, fixture_script: Option<&str>) -> String {
    let port = service_port(kind);
    let test_file = test_file_name(kind);

    let setup = match kind {
        ProjectKind::Node => "\
echo \"Installing dependencies...\"
npm install --legacy-peer-deps 2>&1 | tail -5
npm install --save-dev supertest mocha 2>&1 | tail -3
"
        .to_string(),
        ProjectKind::Python => "\
echo \"Installing dependencies...\"
if [ -f requirements.txt ]; then pip install -r requirements.txt 2>&1 | tail -5; fi
pip install pytest pytest-asyncio httpx 2>&1 | tail -3
"
        .to_string(),
    };

    let fixture = fixture_script
        .map(|script| format!("echo \"Running fixture script...\"\n{}\n", script.trim()))
        .unwrap_or_default();

    let start = match kind {
        ProjectKind::Node => format!("PORT={port} npm run start:dev > /tmp/server.log 2>&1 &\n"),
        ProjectKind::Python => format!(
            "\
if [ -f manage.py ]; then
    python manage.py runserver 0.0.0.0:{port} > /tmp/server.log 2>&1 &
elif [ -f app/main.py ]; then
    uvicorn app.main:app --host 0.0.0.0 --port {port} > /tmp/server.log 2>&1 &
else
    python -m uvicorn main:app --host 0.0.0.0 --port {port} > /tmp/server.log 2>&1 &
fi
"
        ),
    };

    let (probe, max_wait) = match kind {
        ProjectKind::Node => (
            format!("curl -s -o /dev/null -w \"%{{http_code}}\" http://127.0.0.1:{port}/graphql 2>/dev/null | grep -q \"400\\|200\""),
            90,
        ),
        ProjectKind::Python => (format!("curl -s http://127.0.0.1:{port} > /dev/null 2>&1"), 30),
    };

    let run = match kind {
        ProjectKind::Node => format!("npx mocha {test_file} --timeout 30000 2>&1"),
        ProjectKind::Python => format!("pytest {test_file} -v 2>&1"),
    };

    format!(
        "\
#!/bin/bash
cd /app

{setup}
{fixture}
echo \"Starting server on port {port}...\"
{start}SERVER_PID=$!

echo \"Waiting for server...\"
for i in $(seq 1 {max_wait}); do
    if {probe}; then
        echo \"Server is ready after $i seconds\"
        break
    fi
    if ! kill -0 $SERVER_PID 2>/dev/null; then
        echo \"Server process died\"
        cat /tmp/server.log
        exit 1
    fi
    sleep 1
done
sleep 2

echo \"{TEST_MARKER}\"
{run}
TEST_EXIT_CODE=$?

kill $SERVER_PID 2>/dev/null || true
exit $TEST_EXIT_CODE
"
    )
}
